use signal_hook::consts::signal::{
    SIGABRT, SIGALRM, SIGBUS, SIGFPE, SIGHUP, SIGILL, SIGINT, SIGKILL, SIGPIPE, SIGQUIT, SIGSEGV,
    SIGTERM, SIGTRAP, SIGUSR1, SIGUSR2,
};

/// Exit code used when a signal cannot be identified.
const UNKNOWN_SIGNAL_EXIT: i32 = 1;

/// Exit code of a `std` child: its own code, or `128 + signo` when it was
/// terminated by a signal.
pub fn exit_code_from_std(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return 128 + signo;
        }
    }
    UNKNOWN_SIGNAL_EXIT
}

/// Exit code of a PTY child. `portable-pty` reports signal deaths by their
/// description, so the description is mapped back to the host's number.
pub fn exit_code_from_pty(status: &portable_pty::ExitStatus) -> i32 {
    match status.signal() {
        Some(description) => {
            signal_number(description).map_or(UNKNOWN_SIGNAL_EXIT, |signo| 128 + signo)
        }
        None => i32::try_from(status.exit_code()).unwrap_or(i32::MAX),
    }
}

fn signal_number(description: &str) -> Option<i32> {
    let d = description.trim().to_ascii_lowercase();
    let signo = if d.starts_with("hangup") {
        SIGHUP
    } else if d.starts_with("interrupt") {
        SIGINT
    } else if d.starts_with("quit") {
        SIGQUIT
    } else if d.starts_with("illegal instruction") {
        SIGILL
    } else if d.starts_with("trace") {
        SIGTRAP
    } else if d.starts_with("abort") {
        SIGABRT
    } else if d.starts_with("bus error") {
        SIGBUS
    } else if d.starts_with("floating") {
        SIGFPE
    } else if d.starts_with("killed") {
        SIGKILL
    } else if d == "user defined signal 1" {
        SIGUSR1
    } else if d == "user defined signal 2" {
        SIGUSR2
    } else if d.starts_with("segmentation fault") {
        SIGSEGV
    } else if d.starts_with("broken pipe") {
        SIGPIPE
    } else if d.starts_with("alarm clock") {
        SIGALRM
    } else if d.starts_with("terminated") {
        SIGTERM
    } else {
        return None;
    };
    Some(signo)
}
