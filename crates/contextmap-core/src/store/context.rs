use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use tempfile::NamedTempFile;

use crate::config::Settings;
use crate::error::CoreError;

use super::anchor::{extract_anchor, Anchor};

const LOGS_DIR: &str = "logs";
const LOCK_FILE: &str = ".lock";
const SUMMARY_STEM: &str = "session_summary";
const TRANSCRIPT_PREFIX: &str = "session_";
const TRANSCRIPT_EXT: &str = "log";

/// The on-disk context directory:
///
/// ```text
/// <root>/session_summary.<ext>       current summary, replaced atomically
/// <root>/logs/session_<ts>.log       transcript archive, one per session
/// <root>/.lock                       serializes publish and prune
/// ```
#[derive(Debug, Clone)]
pub struct ContextStore {
    root: PathBuf,
    summary_ext: String,
    anchor_lines: usize,
}

impl ContextStore {
    pub fn new(root: impl Into<PathBuf>, summary_ext: &str, anchor_lines: usize) -> Self {
        Self {
            root: root.into(),
            summary_ext: summary_ext.to_string(),
            anchor_lines,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.context_dir.clone(),
            &settings.summary_ext,
            settings.anchor_lines,
        )
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root
            .join(format!("{SUMMARY_STEM}.{}", self.summary_ext))
    }

    /// Scratch destination handed to the summarizer. Lives next to the
    /// summary so publishing never crosses a filesystem boundary.
    pub fn candidate_path(&self) -> PathBuf {
        self.root
            .join(format!(".{SUMMARY_STEM}.{}.candidate", self.summary_ext))
    }

    /// Create the context directory and its archive. Idempotent.
    pub fn ensure_ready(&self) -> Result<(), CoreError> {
        for dir in [self.root.clone(), self.logs_dir()] {
            fs::create_dir_all(&dir).map_err(|source| CoreError::ContextDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Read the Context Anchor from the current summary.
    pub fn read_anchor(&self) -> Result<Anchor, CoreError> {
        let path = self.summary_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Anchor::Fresh),
            Err(e) => return Err(e.into()),
        };
        let document = String::from_utf8_lossy(&bytes);
        let anchor = extract_anchor(&document, self.anchor_lines);
        if anchor.trim().is_empty() {
            return Ok(Anchor::Fresh);
        }
        Ok(Anchor::Recap(anchor))
    }

    /// Allocate a transcript path for a new session.
    ///
    /// Names are millisecond timestamps, so lexical order is chronological.
    /// If the name is already taken a `_<n>` suffix is appended. The file is
    /// not created here; the recorder creates it once the terminal is up.
    pub fn new_transcript_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let logs = self.logs_dir();
        let mut path = logs.join(format!("{TRANSCRIPT_PREFIX}{stamp}.{TRANSCRIPT_EXT}"));
        let mut n = 1;
        while path.exists() {
            path = logs.join(format!("{TRANSCRIPT_PREFIX}{stamp}_{n}.{TRANSCRIPT_EXT}"));
            n += 1;
        }
        path
    }

    /// Mark a finalized transcript read-only.
    pub fn seal_transcript(&self, path: &Path) -> Result<(), CoreError> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms)?;
        Ok(())
    }

    /// Atomically replace the current summary with the content of
    /// `candidate`. On any error the previous summary is left as it was;
    /// callers report the error as a warning.
    pub fn publish_summary(&self, candidate: &Path) -> Result<PathBuf, CoreError> {
        let content = fs::read(candidate).map_err(|e| {
            CoreError::Publish(format!("cannot read {}: {e}", candidate.display()))
        })?;
        if content.iter().all(u8::is_ascii_whitespace) {
            return Err(CoreError::Publish(format!(
                "{} is empty",
                candidate.display()
            )));
        }

        let _lock = self.lock()?;
        let target = self.summary_path();

        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target)
            .map_err(|e| CoreError::Publish(format!("cannot replace {}: {e}", target.display())))?;

        tracing::debug!("Published summary to {}", target.display());
        Ok(target)
    }

    /// Delete archived transcripts whose modification time is older than
    /// `max_age`. Only `session_*.log` files in the archive are considered.
    pub fn prune_archive(&self, max_age: Duration) -> Result<usize, CoreError> {
        let _lock = self.lock()?;
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in fs::read_dir(self.logs_dir())? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!("Skipping archive entry: {e}");
                    continue;
                }
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(TRANSCRIPT_PREFIX)
                || !name.ends_with(&format!(".{TRANSCRIPT_EXT}"))
            {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!("Skipping {name}: {e}");
                    continue;
                }
            };
            if modified < cutoff {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Failed to prune {name}: {e}"),
                }
            }
        }
        Ok(removed)
    }

    fn lock(&self) -> Result<LockGuard, CoreError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;
        fs2::FileExt::lock_exclusive(&file)?;
        Ok(LockGuard { file })
    }
}

struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
