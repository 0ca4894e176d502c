use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FusionError {
    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FusionResult<T> = std::result::Result<T, FusionError>;
