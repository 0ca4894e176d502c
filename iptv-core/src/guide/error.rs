use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuideError {
    #[error("failed to read guide {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse guide {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type GuideResult<T> = std::result::Result<T, GuideError>;
