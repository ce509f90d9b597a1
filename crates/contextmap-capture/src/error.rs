use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("PTY error: {0}")]
    Pty(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start {program}: {reason}")]
    Spawn { program: PathBuf, reason: String },

    #[error("Cannot quote argument for the host shell: {0}")]
    Quote(String),

    #[error("Host `script` utility not found")]
    ScriptNotFound,
}
