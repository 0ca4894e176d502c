pub mod error;
pub mod jobs;
pub mod scheduler;

pub use error::{ScheduleError, ScheduleResult};
pub use jobs::{shell_quote, AtJobScheduler, DryRunScheduler, JobCommands, JobScheduler};
pub use scheduler::{JobKind, ProviderScheduler, ScheduleReport, ScheduledJob};
