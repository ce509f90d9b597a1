use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use contextmap_capture::args::ForwardedArgs;
use contextmap_capture::error::CaptureError;
use contextmap_core::config::Settings;
use contextmap_core::error::CoreError;

mod lifecycle;
mod output;
mod recorder;

/// The wrapped program could not be found.
const EXIT_NOT_FOUND: i32 = 127;
/// The wrapped program was found but could not be started.
const EXIT_CANNOT_RUN: i32 = 126;
/// Any other setup failure before recording began.
const EXIT_SETUP_FAILED: i32 = 125;

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let settings = Settings::from_env().context("Invalid contextmap settings")?;
    init_tracing(&settings.log_filter);

    // argv belongs to the wrapped program; it is only scanned, never parsed.
    let args = ForwardedArgs::from_env();
    lifecycle::run(&settings, &args)
}

fn setup_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(CoreError::ProgramNotFound(_)) = err.downcast_ref::<CoreError>() {
        return EXIT_NOT_FOUND;
    }
    if let Some(CaptureError::Spawn { .. }) = err.downcast_ref::<CaptureError>() {
        return EXIT_CANNOT_RUN;
    }
    EXIT_SETUP_FAILED
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            output::error(&err);
            setup_exit_code(&err)
        }
    };
    std::process::exit(code);
}
