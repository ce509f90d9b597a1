//! End-to-end runs of the `contextmap` binary against small shell programs.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::Command;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;
use tempfile::TempDir;

const SETTINGS_ENV: &[&str] = &[
    "CONTEXTMAP_REAL_PROGRAM",
    "CONTEXTMAP_PROGRAM",
    "CONTEXTMAP_DIR",
    "CONTEXTMAP_RECORDER",
    "CONTEXTMAP_RECORD_INPUT",
    "CONTEXTMAP_SUMMARIZER",
    "CONTEXTMAP_SUMMARY_TIMEOUT",
    "CONTEXTMAP_SUMMARY_EXT",
    "CONTEXTMAP_ANCHOR_LINES",
    "CONTEXTMAP_RETAIN_DAYS",
    "CONTEXTMAP_LOG",
];

/// Summarizer that writes an anchor naming the model it was given.
const WRITING_SUMMARIZER: &str = r#"#!/bin/sh
out=""; model="none"
while [ $# -gt 0 ]; do
  case "$1" in
    --out) out="$2"; shift ;;
    --model) model="$2"; shift ;;
  esac
  shift
done
printf '# Context Anchor\nResume the parser refactor (model=%s).\n' "$model" > "$out"
"#;

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.tmp.path()
    }

    fn context_dir(&self) -> PathBuf {
        self.path().join(".context")
    }

    fn summary(&self) -> PathBuf {
        self.context_dir().join("session_summary.md")
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn transcripts(&self) -> Vec<PathBuf> {
        let logs = self.context_dir().join("logs");
        let Ok(entries) = fs::read_dir(&logs) else {
            return Vec::new();
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
            .collect();
        found.sort();
        found
    }

    /// A `contextmap` invocation wrapping `program`, isolated from the
    /// caller's environment.
    fn contextmap(&self, program: &Path, summarizer: &str) -> Command {
        Command::from_std(self.contextmap_std(program, summarizer))
    }

    /// Same as [`Workspace::contextmap`], for tests that signal the running
    /// wrapper.
    fn contextmap_std(&self, program: &Path, summarizer: &str) -> std::process::Command {
        let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin("contextmap"));
        for key in SETTINGS_ENV {
            cmd.env_remove(key);
        }
        cmd.current_dir(self.path())
            .env("CONTEXTMAP_REAL_PROGRAM", program)
            .env("CONTEXTMAP_DIR", self.context_dir())
            .env("CONTEXTMAP_RECORDER", "native")
            .env("CONTEXTMAP_SUMMARIZER", summarizer)
            .env("CONTEXTMAP_SUMMARY_TIMEOUT", "30");
        cmd
    }
}

#[test]
fn test_exit_code_survives_failed_summary() {
    let ws = Workspace::new();
    ws.contextmap(Path::new("/bin/sh"), "false")
        .args(["-c", "echo working; exit 7"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("warning"));

    assert_eq!(ws.transcripts().len(), 1);
    assert!(!ws.summary().exists());
}

#[test]
fn test_missing_summarizer_keeps_transcript() {
    let ws = Workspace::new();
    ws.contextmap(Path::new("/bin/sh"), "contextmap-test-no-such-summarizer")
        .args(["-c", "echo recorded-output"])
        .assert()
        .success()
        .stdout(predicate::str::contains("recorded-output"))
        .stderr(predicate::str::contains("summary skipped"));

    let transcripts = ws.transcripts();
    assert_eq!(transcripts.len(), 1);
    let recorded = fs::read_to_string(&transcripts[0]).unwrap();
    assert!(recorded.contains("recorded-output"));
    assert!(fs::metadata(&transcripts[0]).unwrap().permissions().readonly());
}

#[test]
fn test_input_reaches_the_program() {
    let ws = Workspace::new();
    ws.contextmap(Path::new("/bin/sh"), "false")
        .args([
            "-c",
            r#"while read -r line; do [ "$line" = q ] && exit 0; echo "got:$line"; done"#,
        ])
        .write_stdin("hi\nq\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("got:hi"));

    let recorded = fs::read_to_string(&ws.transcripts()[0]).unwrap();
    assert!(recorded.contains("got:hi"));
}

#[test]
fn test_anchor_carries_over_to_next_run() {
    let ws = Workspace::new();
    let summarizer = ws.script("summarize.sh", WRITING_SUMMARIZER);
    let summarizer = summarizer.to_str().unwrap();

    ws.contextmap(Path::new("/bin/sh"), summarizer)
        .args(["-c", "echo first"])
        .assert()
        .success()
        .stderr(predicate::str::contains("fresh session"))
        .stderr(predicate::str::contains("context updated"));
    assert!(ws.summary().exists());

    ws.contextmap(Path::new("/bin/sh"), summarizer)
        .args(["-c", "echo second"])
        .assert()
        .success()
        .stderr(predicate::str::contains("where you left off"))
        .stderr(predicate::str::contains("Resume the parser refactor"));

    assert_eq!(ws.transcripts().len(), 2);
    assert!(!ws.context_dir().join(".session_summary.md.candidate").exists());
}

#[test]
fn test_model_flag_reaches_program_and_summarizer() {
    let ws = Workspace::new();
    let program = ws.script("program.sh", "#!/bin/sh\nfor a in \"$@\"; do echo \"arg:$a\"; done\n");
    let summarizer = ws.script("summarize.sh", WRITING_SUMMARIZER);

    ws.contextmap(&program, summarizer.to_str().unwrap())
        .args(["-m", "opus", "two words"])
        .assert()
        .success()
        .stdout(predicate::str::contains("arg:-m"))
        .stdout(predicate::str::contains("arg:opus"))
        .stdout(predicate::str::contains("arg:two words"));

    let summary = fs::read_to_string(ws.summary()).unwrap();
    assert!(summary.contains("model=opus"), "summary: {summary}");
}

#[test]
fn test_missing_program_is_not_found() {
    let ws = Workspace::new();
    ws.contextmap(&ws.path().join("no-such-program"), "false")
        .assert()
        .code(127)
        .stderr(predicate::str::contains("error"));

    assert!(ws.transcripts().is_empty());
}

#[test]
fn test_failing_summarizer_keeps_previous_summary() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.context_dir()).unwrap();
    fs::write(ws.summary(), "# Context Anchor\nKeep this recap.\n").unwrap();
    let broken = ws.script(
        "broken.sh",
        "#!/bin/sh\nwhile [ $# -gt 0 ]; do [ \"$1\" = --out ] && printf 'half' > \"$2\"; shift; done\nexit 3\n",
    );

    ws.contextmap(Path::new("/bin/sh"), broken.to_str().unwrap())
        .args(["-c", "exit 0"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Keep this recap"))
        .stderr(predicate::str::contains("summary failed"));

    assert_eq!(
        fs::read_to_string(ws.summary()).unwrap(),
        "# Context Anchor\nKeep this recap.\n"
    );
}

/// Summarizer that counts its runs in the document found at `--out`.
const COUNTING_SUMMARIZER: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  [ "$1" = --out ] && out="$2"
  shift
done
runs=$(sed -n 's/^runs=//p' "$out" 2>/dev/null)
printf '# Context Anchor\nruns=%s\n' $(( ${runs:-0} + 1 )) > "$out"
"#;

/// Program that reports a forwarded termination and exits 5.
const TRAPPING_PROGRAM: &str = r#"#!/bin/sh
trap 'echo got-term; kill $! 2>/dev/null; exit 5' TERM HUP
echo started
sleep 20 &
wait
"#;

fn poll_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    done()
}

fn wait_exit(child: &mut Child, timeout: Duration) -> ExitStatus {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("contextmap did not exit within {timeout:?}");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn terminate(child: &Child) {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();
}

fn transcript_text(ws: &Workspace) -> String {
    ws.transcripts()
        .first()
        .and_then(|path| fs::read(path).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Run the trapping program under `recorder`, send SIGTERM to the wrapper
/// once the program is up, and return the wrapper's exit status.
fn terminate_session(ws: &Workspace, recorder: &str) -> ExitStatus {
    let program = ws.script("trapping.sh", TRAPPING_PROGRAM);
    let mut child = ws
        .contextmap_std(&program, "false")
        .env("CONTEXTMAP_RECORDER", recorder)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let started = poll_until(Duration::from_secs(10), || {
        transcript_text(ws).contains("started")
    });
    assert!(started, "program never started: {:?}", transcript_text(ws));
    std::thread::sleep(Duration::from_millis(300));

    terminate(&child);
    wait_exit(&mut child, Duration::from_secs(20))
}

#[test]
fn test_summary_history_accumulates() {
    let ws = Workspace::new();
    let summarizer = ws.script("count.sh", COUNTING_SUMMARIZER);
    for _ in 0..3 {
        ws.contextmap(Path::new("/bin/sh"), summarizer.to_str().unwrap())
            .args(["-c", "exit 0"])
            .assert()
            .success();
    }
    assert_eq!(
        fs::read_to_string(ws.summary()).unwrap(),
        "# Context Anchor\nruns=3\n"
    );
}

#[test]
fn test_native_session_forwards_termination() {
    let ws = Workspace::new();
    let status = terminate_session(&ws, "native");
    assert_eq!(status.code(), Some(5));
    assert!(transcript_text(&ws).contains("got-term"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_script_session_forwards_termination() {
    let available = std::process::Command::new("script")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success());
    if !available {
        eprintln!("script not installed; skipping");
        return;
    }

    let ws = Workspace::new();
    let status = terminate_session(&ws, "command-string");
    // script reports either the child's own code or the signal it relayed.
    assert!(
        matches!(status.code(), Some(5) | Some(143)),
        "unexpected status {status:?}"
    );
    assert!(transcript_text(&ws).contains("got-term"));
}

#[test]
fn test_termination_during_summary_keeps_exit_code() {
    let ws = Workspace::new();
    let marker = ws.path().join("summarizer-running");
    let summarizer = ws.script(
        "slow.sh",
        "#!/bin/sh\ntouch \"$CONTEXTMAP_TEST_MARKER\"\nexec sleep 30\n",
    );
    let mut child = ws
        .contextmap_std(Path::new("/bin/sh"), summarizer.to_str().unwrap())
        .args(["-c", "exit 3"])
        .env("CONTEXTMAP_TEST_MARKER", &marker)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    assert!(poll_until(Duration::from_secs(10), || marker.exists()));
    let signalled = Instant::now();
    terminate(&child);
    let status = wait_exit(&mut child, Duration::from_secs(20));

    assert_eq!(status.code(), Some(3));
    assert!(signalled.elapsed() < Duration::from_secs(10));
    assert!(!ws.summary().exists());
    assert_eq!(ws.transcripts().len(), 1);
}
