use std::thread::JoinHandle;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGTERM, SIGWINCH};
use signal_hook::iterator::{Handle, Signals};

/// Signals the recorder reacts to while a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionSignal {
    /// The real terminal changed size.
    Resize,
    /// The wrapper was asked to stop with this signal; the child must be
    /// told too.
    Terminate(i32),
}

/// Background thread delivering [`SessionSignal`]s to a callback.
/// Dropping the watch stops the thread.
pub(crate) struct SignalWatch {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalWatch {
    pub(crate) fn spawn<F>(watch_resize: bool, mut on_signal: F) -> std::io::Result<Self>
    where
        F: FnMut(SessionSignal) + Send + 'static,
    {
        let mut wanted = vec![SIGTERM, SIGHUP];
        if watch_resize {
            wanted.push(SIGWINCH);
        }
        let mut signals = Signals::new(&wanted)?;
        let handle = signals.handle();

        let thread = std::thread::spawn(move || {
            for signo in signals.forever() {
                let signal = if signo == SIGWINCH {
                    SessionSignal::Resize
                } else {
                    tracing::debug!("Received signal {signo}, forwarding to child");
                    SessionSignal::Terminate(signo)
                };
                on_signal(signal);
            }
        });

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalWatch {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Deliver `signo` to process `pid`.
pub(crate) fn forward(pid: u32, signo: i32) -> std::io::Result<()> {
    let signal = Signal::try_from(signo)?;
    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), signal)?;
    Ok(())
}
