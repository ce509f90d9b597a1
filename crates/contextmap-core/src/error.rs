use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Context directory {path} is unusable: {source}")]
    ContextDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    #[error("Publish error: {0}")]
    Publish(String),
}
