mod program;
mod settings;

pub use program::resolve_program;
pub use settings::{RecorderKind, Settings};
