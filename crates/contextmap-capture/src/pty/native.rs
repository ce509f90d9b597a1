use std::ffi::OsString;
use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use crate::error::CaptureError;

use super::exit::exit_code_from_pty;
use super::signals::{forward, SessionSignal, SignalWatch};
use super::sink::TranscriptSink;
use super::strategy::{RecordingStrategy, RunningSession, SessionOutcome};

/// How long output keeps draining after the child has exited. A grandchild
/// that inherited the terminal can keep it open forever.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

type SharedSink = Arc<Mutex<TranscriptSink>>;
type SharedMaster = Arc<Mutex<Box<dyn MasterPty + Send>>>;

/// Records a session through an in-process pseudo-terminal.
///
/// Input from the real terminal is copied to the child and the child's output
/// is copied both to the real terminal and into the transcript, each on its
/// own thread. With the default terminal endpoints the real terminal is put
/// into raw mode for the duration, resizes are propagated, and SIGTERM/SIGHUP
/// are forwarded to the child.
pub struct NativePtyRecorder {
    input: Option<Box<dyn Read + Send>>,
    output: Option<Box<dyn Write + Send>>,
    record_input: bool,
    attached: bool,
}

impl NativePtyRecorder {
    /// Recorder attached to this process's own terminal.
    pub fn new() -> Self {
        Self {
            input: None,
            output: None,
            record_input: false,
            attached: true,
        }
    }

    /// Recorder with explicit terminal endpoints. No raw mode, no signal
    /// handling.
    pub fn with_io(input: Box<dyn Read + Send>, output: Box<dyn Write + Send>) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            record_input: false,
            attached: false,
        }
    }

    /// Also copy the raw user input into the transcript. Echoed input is in
    /// the output stream already; this captures keystrokes that are not
    /// echoed.
    pub fn record_input(mut self, yes: bool) -> Self {
        self.record_input = yes;
        self
    }
}

impl Default for NativePtyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingStrategy for NativePtyRecorder {
    fn name(&self) -> &'static str {
        "native"
    }

    fn start(
        &mut self,
        program: &Path,
        args: &[OsString],
        transcript: &Path,
    ) -> Result<Box<dyn RunningSession>, CaptureError> {
        let pty_system = native_pty_system();
        let (cols, rows) = terminal_size().unwrap_or((80, 24));

        // Allocation failure is fatal and must happen before the transcript
        // exists.
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CaptureError::Pty(format!("Failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(std::env::current_dir()?);

        let sink = TranscriptSink::create(transcript);

        let child = match pair.slave.spawn_command(cmd) {
            Ok(child) => child,
            Err(e) => {
                // Nothing was recorded; do not leave an empty transcript.
                sink.discard();
                return Err(CaptureError::Spawn {
                    program: program.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        let sink: SharedSink = Arc::new(Mutex::new(sink));
        let pid = child.process_id();
        tracing::debug!("Spawned {} (pid {pid:?}) on {cols}x{rows} PTY", program.display());

        // The child holds the slave now; keeping ours open would stop the
        // reader from ever seeing EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CaptureError::Pty(format!("Failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CaptureError::Pty(format!("Failed to take PTY writer: {e}")))?;
        let master: SharedMaster = Arc::new(Mutex::new(pair.master));

        let input = self.input.take();
        let output = self.output.take();
        let interactive = self.attached && input.is_none() && std::io::stdin().is_terminal();

        let raw_mode = if interactive {
            RawModeGuard::enable()
        } else {
            None
        };

        let signals = if self.attached {
            let mut killer = child.clone_killer();
            let master = Arc::clone(&master);
            let watch = SignalWatch::spawn(interactive, move |signal| match signal {
                SessionSignal::Resize => resize(&master),
                SessionSignal::Terminate(signo) => {
                    let delivered = match pid {
                        Some(pid) => forward(pid, signo).or_else(|_| killer.kill()),
                        None => killer.kill(),
                    };
                    if let Err(e) = delivered {
                        tracing::warn!("Failed to forward signal {signo} to child: {e}");
                    }
                }
            });
            match watch {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!("Cannot watch signals: {e}; resize and termination will not be forwarded");
                    None
                }
            }
        } else {
            None
        };

        let (done_tx, done_rx) = mpsc::channel();
        let output_thread = {
            let sink = Arc::clone(&sink);
            let output: Box<dyn Write + Send> =
                output.unwrap_or_else(|| Box::new(std::io::stdout()));
            std::thread::spawn(move || {
                copy_output(reader, output, &sink);
                let _ = done_tx.send(());
            })
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let sink = self.record_input.then(|| Arc::clone(&sink));
            let shutdown = Arc::clone(&shutdown);
            let input: Box<dyn Read + Send> =
                input.unwrap_or_else(|| Box::new(std::io::stdin()));
            // Detached: a read on the real stdin cannot be interrupted
            // portably, so this thread may outlive the session.
            std::thread::spawn(move || copy_input(input, writer, sink.as_ref(), &shutdown));
        }

        Ok(Box::new(NativeSession {
            child,
            pid,
            transcript: transcript.to_path_buf(),
            sink,
            output_thread: Some(output_thread),
            done_rx,
            shutdown,
            _master: master,
            signals,
            raw_mode,
        }))
    }
}

struct NativeSession {
    child: Box<dyn Child + Send + Sync>,
    pid: Option<u32>,
    transcript: PathBuf,
    sink: SharedSink,
    output_thread: Option<JoinHandle<()>>,
    done_rx: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    _master: SharedMaster,
    signals: Option<SignalWatch>,
    raw_mode: Option<RawModeGuard>,
}

impl RunningSession for NativeSession {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(mut self: Box<Self>) -> Result<SessionOutcome, CaptureError> {
        let status = self
            .child
            .wait()
            .map_err(|e| CaptureError::Pty(format!("Failed to wait for child: {e}")));

        // Child is gone: stop forwarding input and let the output drain.
        self.shutdown.store(true, Ordering::Relaxed);
        self.signals = None;
        match self.done_rx.recv_timeout(DRAIN_GRACE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.output_thread.take() {
                    let _ = thread.join();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!("PTY output still open after child exit; finalizing transcript");
            }
        }

        let (bytes_recorded, transcript_errors) = match self.sink.lock() {
            Ok(mut sink) => sink.finish(),
            Err(poisoned) => poisoned.into_inner().finish(),
        };

        // Restore the terminal before anything else is printed.
        self.raw_mode = None;

        let status = status?;
        Ok(SessionOutcome {
            exit_code: exit_code_from_pty(&status),
            transcript: self.transcript.clone(),
            bytes_recorded,
            transcript_errors,
        })
    }
}

fn copy_output(mut reader: Box<dyn Read + Send>, mut output: Box<dyn Write + Send>, sink: &SharedSink) {
    let mut buf = [0u8; 8192];
    let mut output_ok = true;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if output_ok {
                    output_ok = output.write_all(&buf[..n]).and_then(|()| output.flush()).is_ok();
                    if !output_ok {
                        tracing::debug!("Terminal output closed; recording continues");
                    }
                }
                if let Ok(mut sink) = sink.lock() {
                    sink.record(&buf[..n]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // EIO once the child side is closed.
            Err(_) => break,
        }
    }
}

fn copy_input(
    mut input: Box<dyn Read + Send>,
    mut writer: Box<dyn Write + Send>,
    sink: Option<&SharedSink>,
    shutdown: &AtomicBool,
) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        if writer.write_all(&buf[..n]).and_then(|()| writer.flush()).is_err() {
            break;
        }
        if let Some(sink) = sink {
            if let Ok(mut sink) = sink.lock() {
                sink.record(&buf[..n]);
            }
        }
    }
}

fn resize(master: &SharedMaster) {
    let Some((cols, rows)) = terminal_size() else {
        return;
    };
    let Ok(master) = master.lock() else {
        return;
    };
    let size = PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    };
    if let Err(e) = master.resize(size) {
        tracing::debug!("Failed to resize PTY to {cols}x{rows}: {e}");
    }
}

/// Size of the real terminal, falling back to `COLUMNS`/`LINES`.
fn terminal_size() -> Option<(u16, u16)> {
    if let Ok((cols, rows)) = crossterm::terminal::size() {
        if cols > 0 && rows > 0 {
            return Some((cols, rows));
        }
    }

    let cols = std::env::var("COLUMNS")
        .ok()
        .and_then(|v| v.parse::<u16>().ok());
    let rows = std::env::var("LINES")
        .ok()
        .and_then(|v| v.parse::<u16>().ok());

    match (cols, rows) {
        (Some(c), Some(r)) if c > 0 && r > 0 => Some((c, r)),
        _ => None,
    }
}

/// Keeps the real terminal in raw mode until dropped, so line editing and
/// key handling belong to the child.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Option<Self> {
        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                tracing::warn!("Cannot switch terminal to raw mode: {e}");
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}
