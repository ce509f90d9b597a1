use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::CaptureError;

/// What a finished recording yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Exit code of the wrapped program; `128 + signo` if it was killed.
    pub exit_code: i32,
    pub transcript: PathBuf,
    pub bytes_recorded: u64,
    /// Transcript writes that failed while the session kept running.
    pub transcript_errors: u64,
}

/// A way of running a program under a pseudo-terminal while recording it.
/// Picked once at startup.
pub trait RecordingStrategy {
    fn name(&self) -> &'static str;

    /// Spawn `program` with `args`, recording into `transcript`.
    ///
    /// Errors here are setup failures: nothing has been recorded.
    fn start(
        &mut self,
        program: &Path,
        args: &[OsString],
        transcript: &Path,
    ) -> Result<Box<dyn RunningSession>, CaptureError>;
}

/// A started recording. `wait` blocks until the program exits and the
/// transcript is finalized; there is no timeout.
pub trait RunningSession {
    fn pid(&self) -> Option<u32>;

    fn wait(self: Box<Self>) -> Result<SessionOutcome, CaptureError>;
}
