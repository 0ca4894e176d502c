pub mod config;
pub mod error;
pub mod exec;
pub mod fusion;
pub mod guide;
pub mod ledger;
pub mod logs;
pub mod naming;
pub mod recorder;
pub mod roles;
pub mod schedule;

pub use config::{
    load_channel_map, load_iptv_config, ChannelLookup, ChannelMap, ConfigBundle, IptvConfig,
    ProviderBinding, ProviderCatalog, RoleSet,
};
pub use error::{ConfigError, Result};
pub use exec::{CommandExecutor, SystemCommandExecutor};
pub use fusion::{
    FfprobeProbe, FusionError, FusionMerger, FusionOutcome, FusionRequest, FusionResult,
    MediaInfo, MediaProbe, MergedTimeline, Segment,
};
pub use guide::{AiringRequest, GuideError, GuideResult};
pub use ledger::{BusyLedger, LedgerError, LedgerResult, MemoryBusyLedger, SqliteBusyLedger};
pub use logs::{prune_logs, PruneReport};
pub use naming::{sanitize_title, SaveLayout};
pub use recorder::{
    ChildRecorderLauncher, ProcessTable, RecordOutcome, RecordRequest, RecorderError,
    RecorderLauncher, RecorderProcess, RecorderResult, SegmentRecorder, SysinfoProcessTable,
};
pub use roles::{RecorderKind, Role};
pub use schedule::{
    AtJobScheduler, DryRunScheduler, JobCommands, JobScheduler, ProviderScheduler,
    ScheduleError, ScheduleReport, ScheduleResult,
};
