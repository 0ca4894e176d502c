use thiserror::Error;

use crate::error::ConfigError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("job submission failed ({command}): {stderr}")]
    Submission {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("job submission timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;
