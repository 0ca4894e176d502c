use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("recording length of {seconds}s is out of range")]
    DurationOutOfRange { seconds: u64 },
    #[error("provider {provider} is not referenced by any rank")]
    UnknownProvider { provider: String },
}

pub type RecorderResult<T> = std::result::Result<T, RecorderError>;
