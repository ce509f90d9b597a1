use contextmap_capture::error::CaptureError;
use contextmap_capture::pty::{HostDialect, HostScriptRecorder, NativePtyRecorder, RecordingStrategy};
use contextmap_core::config::{RecorderKind, Settings};

/// Pick the recording strategy once, from settings and the host OS.
pub fn select(settings: &Settings) -> Result<Box<dyn RecordingStrategy>, CaptureError> {
    let strategy: Box<dyn RecordingStrategy> = match settings.recorder {
        RecorderKind::Native => {
            Box::new(NativePtyRecorder::new().record_input(settings.record_input))
        }
        RecorderKind::Script => Box::new(HostScriptRecorder::new(HostDialect::detect())?),
        RecorderKind::CommandString => {
            Box::new(HostScriptRecorder::new(HostDialect::CommandString)?)
        }
        RecorderKind::ShellSubstitution => {
            Box::new(HostScriptRecorder::new(HostDialect::ShellSubstitution)?)
        }
    };
    if settings.record_input && settings.recorder != RecorderKind::Native {
        tracing::info!("CONTEXTMAP_RECORD_INPUT only applies to the native recorder");
    }
    tracing::debug!("Recording with {}", strategy.name());
    Ok(strategy)
}
