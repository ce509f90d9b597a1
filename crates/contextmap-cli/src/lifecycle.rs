use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use signal_hook::consts::signal::{SIGHUP, SIGTERM};

use contextmap_capture::args::ForwardedArgs;
use contextmap_capture::pty::SessionOutcome;
use contextmap_core::config::{resolve_program, Settings};
use contextmap_core::store::ContextStore;
use contextmap_core::summarize::{Summarizer, SummaryOutcome, SummaryRequest};

use crate::output;
use crate::recorder;

/// Phases of one invocation. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Preflight,
    Recording,
    Postflight,
    Done,
}

#[derive(Debug)]
struct Lifecycle {
    phase: Phase,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            phase: Phase::Preflight,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            next > self.phase,
            "lifecycle cannot move from {:?} to {:?}",
            self.phase,
            next
        );
        tracing::debug!("Lifecycle {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }
}

/// What this run is about. Lives for one invocation, owns nothing on disk.
#[derive(Debug)]
struct SessionDescriptor<'a> {
    program: PathBuf,
    args: &'a ForwardedArgs,
    transcript: PathBuf,
}

/// Run one wrapped session and return the exit code to leave with.
///
/// Errors are setup failures only. Once the wrapped program has run, its exit
/// code is returned no matter what happens during post-flight.
pub fn run(settings: &Settings, args: &ForwardedArgs) -> Result<i32> {
    let mut lifecycle = Lifecycle::new();

    // PREFLIGHT
    let store = ContextStore::from_settings(settings);
    store
        .ensure_ready()
        .context("Failed to prepare the context directory")?;
    match store.read_anchor() {
        Ok(anchor) => output::anchor(&anchor),
        Err(e) => output::warn(format!("cannot read previous summary: {e}")),
    }
    let program = resolve_program(settings).context("Cannot locate the wrapped program")?;
    let mut strategy = recorder::select(settings).context("Cannot set up session recording")?;

    // RECORDING
    lifecycle.advance(Phase::Recording);
    let descriptor = SessionDescriptor {
        program,
        args,
        transcript: store.new_transcript_path(),
    };
    tracing::info!(
        "Recording {} into {}",
        descriptor.program.display(),
        descriptor.transcript.display()
    );
    let session = strategy
        .start(
            &descriptor.program,
            descriptor.args.argv(),
            &descriptor.transcript,
        )
        .with_context(|| format!("Failed to start {}", descriptor.program.display()))?;
    let outcome = session.wait().context("Lost track of the wrapped program")?;

    // POSTFLIGHT
    lifecycle.advance(Phase::Postflight);
    let interrupted = termination_flag();
    postflight(settings, &store, &descriptor, &outcome, &interrupted);

    lifecycle.advance(Phase::Done);
    Ok(outcome.exit_code)
}

/// Archive, summarize, publish. Every failure here is a warning.
fn postflight(
    settings: &Settings,
    store: &ContextStore,
    descriptor: &SessionDescriptor<'_>,
    outcome: &SessionOutcome,
    interrupted: &Arc<AtomicBool>,
) {
    if outcome.transcript_errors > 0 {
        output::warn(format!(
            "{} transcript write(s) failed; {} may be incomplete",
            outcome.transcript_errors,
            outcome.transcript.display()
        ));
    }

    if !outcome.transcript.exists() {
        output::warn("no transcript was recorded; summary skipped");
        prune(settings, store);
        return;
    }
    if let Err(e) = store.seal_transcript(&outcome.transcript) {
        tracing::warn!("Cannot mark transcript read-only: {e}");
    }
    output::notice(format!("transcript saved to {}", outcome.transcript.display()));

    let candidate = store.candidate_path();
    let current = store.summary_path();
    let request = SummaryRequest {
        transcript: &outcome.transcript,
        destination: &candidate,
        model: descriptor.args.model(),
        previous_summary: current.exists().then_some(current.as_path()),
        program: Some(&descriptor.program),
    };

    let summarizer = Summarizer::from_settings(settings).with_cancel(Arc::clone(interrupted));
    match summarizer.summarize(&request) {
        SummaryOutcome::Produced(path) => match store.publish_summary(&path) {
            Ok(published) => output::notice(format!("context updated: {}", published.display())),
            Err(e) => output::warn(format!("{e}; previous summary kept")),
        },
        other => output::warn(other.describe()),
    }
    discard_candidate(&candidate);

    if interrupted.load(Ordering::SeqCst) {
        tracing::debug!("Interrupted during post-flight; skipping cleanup");
        return;
    }
    prune(settings, store);
}

/// Flag raised by SIGTERM or SIGHUP after the session has ended. A second
/// signal takes the default action.
fn termination_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    for signo in [SIGTERM, SIGHUP] {
        let registered = signal_hook::flag::register_conditional_default(signo, Arc::clone(&flag))
            .and_then(|_| signal_hook::flag::register(signo, Arc::clone(&flag)));
        if let Err(e) = registered {
            tracing::warn!("Cannot watch signal {signo} during post-flight: {e}");
        }
    }
    flag
}

fn prune(settings: &Settings, store: &ContextStore) {
    let Some(retention) = settings.retention else {
        return;
    };
    match store.prune_archive(retention) {
        Ok(0) => {}
        Ok(n) => output::notice(format!("removed {n} old transcript(s)")),
        Err(e) => output::warn(format!("transcript cleanup failed: {e}")),
    }
}

fn discard_candidate(candidate: &Path) {
    if let Err(e) = std::fs::remove_file(candidate) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!("Cannot remove {}: {e}", candidate.display());
        }
    }
}
