use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CaptureError;

use super::exit::exit_code_from_std;
use super::quoting::command_line;
use super::signals::{forward, SessionSignal, SignalWatch};
use super::strategy::{RecordingStrategy, RunningSession, SessionOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long `script` gets to wind down after a forwarded signal before it is
/// killed outright.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// The two invocation dialects of the host `script` utility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDialect {
    /// util-linux: the program runs as a shell command string,
    /// `script -c "<command line>" <file>`.
    CommandString,
    /// BSD/macOS: `script` runs "the user's shell"; `SHELL` is pointed at the
    /// program and its argv is passed through as separate words.
    ShellSubstitution,
}

impl HostDialect {
    /// Dialect of the `script` shipped with this OS.
    pub fn detect() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            HostDialect::CommandString
        } else {
            HostDialect::ShellSubstitution
        }
    }
}

/// Records a session by handing the terminal to the host `script` utility.
/// `script` owns the pseudo-terminal, raw mode and resizes; this recorder only
/// builds the invocation, forwards termination signals, and collects the exit
/// code.
pub struct HostScriptRecorder {
    dialect: HostDialect,
    script: PathBuf,
}

impl HostScriptRecorder {
    pub fn new(dialect: HostDialect) -> Result<Self, CaptureError> {
        let script = which::which("script").map_err(|_| CaptureError::ScriptNotFound)?;
        Ok(Self::with_script(dialect, script))
    }

    pub fn with_script(dialect: HostDialect, script: PathBuf) -> Self {
        Self { dialect, script }
    }

    /// The `script` invocation for `program args...` recording to
    /// `transcript`.
    pub fn build_command(
        &self,
        program: &Path,
        args: &[OsString],
        transcript: &Path,
    ) -> Result<Command, CaptureError> {
        let mut cmd = Command::new(&self.script);
        match self.dialect {
            HostDialect::CommandString => {
                let line = command_line(program.as_os_str(), args)?;
                // -e: return the child's exit code, -f: flush every write.
                cmd.args(["-q", "-e", "-f", "-c"])
                    .arg(line)
                    .arg(transcript)
                    .env("SHELL", "/bin/sh");
            }
            HostDialect::ShellSubstitution => {
                cmd.arg("-q")
                    .arg(transcript)
                    .arg(program)
                    .args(args)
                    .env("SHELL", program);
            }
        }
        Ok(cmd)
    }
}

impl RecordingStrategy for HostScriptRecorder {
    fn name(&self) -> &'static str {
        match self.dialect {
            HostDialect::CommandString => "script (command string)",
            HostDialect::ShellSubstitution => "script (shell substitution)",
        }
    }

    fn start(
        &mut self,
        program: &Path,
        args: &[OsString],
        transcript: &Path,
    ) -> Result<Box<dyn RunningSession>, CaptureError> {
        let mut cmd = self.build_command(program, args, transcript)?;

        // Watch before spawning so an early signal is not lost.
        let pending = Arc::new(AtomicI32::new(0));
        let flag = Arc::clone(&pending);
        let signals = SignalWatch::spawn(false, move |signal| {
            if let SessionSignal::Terminate(signo) = signal {
                flag.store(signo, Ordering::SeqCst);
            }
        })
        .map_err(|e| tracing::warn!("Cannot watch signals: {e}; termination will not be forwarded"))
        .ok();

        tracing::debug!("Running {cmd:?}");
        let child = cmd.spawn().map_err(|e| CaptureError::Spawn {
            program: self.script.clone(),
            reason: e.to_string(),
        })?;

        Ok(Box::new(HostScriptSession {
            child,
            transcript: transcript.to_path_buf(),
            pending,
            _signals: signals,
        }))
    }
}

struct HostScriptSession {
    child: Child,
    transcript: PathBuf,
    /// Signal number waiting to be forwarded, 0 when none.
    pending: Arc<AtomicI32>,
    _signals: Option<SignalWatch>,
}

impl RunningSession for HostScriptSession {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn wait(mut self: Box<Self>) -> Result<SessionOutcome, CaptureError> {
        let mut forwarded_at: Option<Instant> = None;
        let mut killed = false;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            match forwarded_at {
                None => {
                    let signo = self.pending.swap(0, Ordering::SeqCst);
                    if signo != 0 {
                        let pid = self.child.id();
                        tracing::debug!("Forwarding signal {signo} to script (pid {pid})");
                        if let Err(e) = forward(pid, signo) {
                            tracing::warn!("Failed to forward signal {signo}: {e}");
                        }
                        forwarded_at = Some(Instant::now());
                    }
                }
                Some(at) if !killed && at.elapsed() >= KILL_GRACE => {
                    tracing::warn!("script did not exit after a forwarded signal; killing it");
                    self.child.kill()?;
                    killed = true;
                }
                Some(_) => {}
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        // `script` writes the transcript itself; all that is left is its size.
        let bytes_recorded = std::fs::metadata(&self.transcript)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(SessionOutcome {
            exit_code: exit_code_from_std(status),
            transcript: self.transcript.clone(),
            bytes_recorded,
            transcript_errors: 0,
        })
    }
}
