use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::config::Settings;

/// Environment variable carrying the path of the summary being replaced.
pub const PREVIOUS_SUMMARY_ENV: &str = "CONTEXTMAP_PREVIOUS_SUMMARY";
/// Environment variable carrying the resolved wrapped-program path.
pub const REAL_PROGRAM_ENV: &str = "CONTEXTMAP_REAL_PROGRAM";

/// How often a running summarizer is checked for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// One summarization job.
#[derive(Debug, Clone)]
pub struct SummaryRequest<'a> {
    pub transcript: &'a Path,
    pub destination: &'a Path,
    pub model: Option<&'a str>,
    pub previous_summary: Option<&'a Path>,
    pub program: Option<&'a Path>,
}

/// Result of a summarization attempt. Never an error: the transcript is
/// retained in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    /// The summarizer wrote a non-empty document to the destination.
    Produced(PathBuf),
    /// The summarizer is not installed; nothing was run.
    Skipped { reason: String, transcript: PathBuf },
    /// The summarizer ran and failed, timed out, was cancelled, or produced
    /// nothing.
    Failed { reason: String, transcript: PathBuf },
}

impl SummaryOutcome {
    /// One line suitable for the user's error stream.
    pub fn describe(&self) -> String {
        match self {
            SummaryOutcome::Produced(path) => format!("summary written to {}", path.display()),
            SummaryOutcome::Skipped { reason, transcript } => format!(
                "summary skipped ({reason}), transcript retained at {}",
                transcript.display()
            ),
            SummaryOutcome::Failed { reason, transcript } => format!(
                "summary failed ({reason}), transcript retained at {}",
                transcript.display()
            ),
        }
    }
}

/// Runs the external summarizer as an opaque command:
/// `<command...> <transcript> --out <destination> [--model <model>]`.
#[derive(Debug, Clone)]
pub struct Summarizer {
    command: Vec<String>,
    timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl Summarizer {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            cancel: None,
        }
    }

    /// Stop a running summarizer as soon as `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.summarizer.clone(), settings.summary_timeout)
    }

    /// Check that the summarizer's runtime is present: the command itself
    /// must resolve, and every path-like argument (a script, say) must exist.
    pub fn probe(&self) -> Result<PathBuf, String> {
        let (head, rest) = self
            .command
            .split_first()
            .ok_or_else(|| "no summarizer configured".to_string())?;
        let program = which::which(head).map_err(|_| format!("{head} not found"))?;
        for word in rest {
            if word.contains('/') && !word.starts_with('-') && !Path::new(word).exists() {
                return Err(format!("{word} not found"));
            }
        }
        Ok(program)
    }

    /// Run the summarizer once.
    ///
    /// The destination starts out as a copy of the previous summary, so a
    /// summarizer that builds on its own `--out` file keeps its history.
    pub fn summarize(&self, request: &SummaryRequest<'_>) -> SummaryOutcome {
        let transcript = request.transcript.to_path_buf();

        let program = match self.probe() {
            Ok(p) => p,
            Err(reason) => {
                tracing::info!("Summarizer unavailable: {reason}");
                return SummaryOutcome::Skipped { reason, transcript };
            }
        };

        let failed = |reason: String| SummaryOutcome::Failed {
            reason,
            transcript: transcript.clone(),
        };

        // A stale candidate from an earlier crash must not pass for output.
        if let Err(e) = std::fs::remove_file(request.destination) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return failed(format!("cannot clear {}: {e}", request.destination.display()));
            }
        }
        if let Some(previous) = request.previous_summary {
            if let Err(e) = std::fs::copy(previous, request.destination) {
                tracing::warn!(
                    "Cannot seed {} from {}: {e}; summarizer starts without history",
                    request.destination.display(),
                    previous.display()
                );
            }
        }

        let mut cmd = Command::new(&program);
        cmd.args(&self.command[1..])
            .arg(request.transcript)
            .arg("--out")
            .arg(request.destination)
            .stdin(Stdio::null());
        if let Some(model) = request.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(previous) = request.previous_summary {
            cmd.env(PREVIOUS_SUMMARY_ENV, previous);
        }
        if let Some(real) = request.program {
            cmd.env(REAL_PROGRAM_ENV, real);
        }

        tracing::debug!("Running summarizer: {cmd:?}");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return failed(format!("cannot start {}: {e}", program.display())),
        };

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            let now = Instant::now();
            let reason = if self.cancelled() {
                "interrupted".to_string()
            } else if now >= deadline {
                format!("timed out after {}s", self.timeout.as_secs())
            } else {
                match child.wait_timeout((deadline - now).min(CANCEL_POLL)) {
                    Ok(Some(status)) => break status,
                    Ok(None) => continue,
                    Err(e) => return failed(format!("wait failed: {e}")),
                }
            };
            let _ = child.kill();
            let _ = child.wait();
            return failed(reason);
        };

        if !status.success() {
            return failed(format!("summarizer exited with {status}"));
        }

        match std::fs::metadata(request.destination) {
            Ok(meta) if meta.len() > 0 => SummaryOutcome::Produced(request.destination.to_path_buf()),
            Ok(_) => failed("summarizer produced an empty document".into()),
            Err(_) => failed("summarizer produced no document".into()),
        }
    }
}
