mod exit;
mod host_script;
mod native;
mod quoting;
mod signals;
mod sink;
mod strategy;

pub use exit::{exit_code_from_pty, exit_code_from_std};
pub use host_script::{HostDialect, HostScriptRecorder};
pub use native::NativePtyRecorder;
pub use quoting::command_line;
pub use sink::TranscriptSink;
pub use strategy::{RecordingStrategy, RunningSession, SessionOutcome};
