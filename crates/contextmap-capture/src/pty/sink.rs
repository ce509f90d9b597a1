use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Best-effort transcript writer.
///
/// Write failures are logged and counted but never surface as errors: the
/// live session must keep running even when the transcript cannot.
pub struct TranscriptSink {
    writer: Option<Box<dyn Write + Send>>,
    /// Set when this sink created the file itself.
    created: Option<PathBuf>,
    bytes: u64,
    errors: u64,
    closed: bool,
}

impl TranscriptSink {
    /// Create the transcript file. If that fails the sink records nothing.
    /// An existing file is never opened or truncated.
    pub fn create(path: &Path) -> Self {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Self {
                created: Some(path.to_path_buf()),
                ..Self::from_writer(Box::new(file))
            },
            Err(e) => {
                tracing::warn!(
                    "Cannot create transcript {}: {e}; session will not be recorded",
                    path.display()
                );
                Self {
                    writer: None,
                    created: None,
                    bytes: 0,
                    errors: 1,
                    closed: false,
                }
            }
        }
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Some(writer),
            created: None,
            bytes: 0,
            errors: 0,
            closed: false,
        }
    }

    pub fn record(&mut self, data: &[u8]) {
        if self.closed || data.is_empty() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        match writer.write_all(data) {
            Ok(()) => self.bytes += data.len() as u64,
            Err(e) => {
                self.errors += 1;
                if self.errors == 1 {
                    tracing::warn!("Transcript write failed: {e}; continuing without a complete transcript");
                } else {
                    tracing::debug!("Transcript write failed again: {e}");
                }
            }
        }
    }

    /// Flush and stop accepting data. Returns `(bytes written, failed writes)`.
    pub fn finish(&mut self) -> (u64, u64) {
        if !self.closed {
            self.closed = true;
            if let Some(writer) = self.writer.as_mut() {
                if let Err(e) = writer.flush() {
                    self.errors += 1;
                    tracing::warn!("Transcript flush failed: {e}");
                }
            }
            self.writer = None;
        }
        (self.bytes, self.errors)
    }

    /// Drop the sink and remove its file, but only if this sink created it.
    pub fn discard(mut self) {
        self.writer = None;
        if let Some(path) = self.created.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!("Cannot remove {}: {e}", path.display());
            }
        }
    }
}
