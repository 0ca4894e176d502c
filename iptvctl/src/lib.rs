pub mod logging;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use iptv_core::guide::{self, format_stamp};
use iptv_core::ledger::{self, BusyEntry};
use iptv_core::naming::sanitize_title;
use iptv_core::schedule::JobKind;
use iptv_core::{
    prune_logs, AtJobScheduler, BusyLedger, ChildRecorderLauncher, CommandExecutor, ConfigBundle,
    DryRunScheduler, FfprobeProbe, FusionMerger, FusionOutcome, FusionRequest, JobCommands,
    JobScheduler, MemoryBusyLedger, ProviderScheduler, PruneReport, RecordOutcome, RecordRequest,
    RecorderError, RecorderKind, Role, ScheduleReport, SegmentRecorder, SqliteBusyLedger,
    SysinfoProcessTable, SystemCommandExecutor,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] iptv_core::ConfigError),
    #[error("guide error: {0}")]
    Guide(#[from] iptv_core::GuideError),
    #[error("ledger error: {0}")]
    Ledger(#[from] iptv_core::LedgerError),
    #[error("schedule error: {0}")]
    Schedule(#[from] iptv_core::ScheduleError),
    #[error("recorder error: {0}")]
    Recorder(#[from] iptv_core::RecorderError),
    #[error("fusion error: {0}")]
    Fusion(#[from] iptv_core::FusionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Scheduled IPTV recording with provider fallback", long_about = None)]
pub struct Cli {
    /// Path to iptv.toml
    #[arg(long, default_value = "configs/iptv.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue recording and fusion jobs for the program guide
    Schedule(ScheduleArgs),
    /// Record one role of an airing (run by the job scheduler)
    Record(RecordArgs),
    /// Merge the recorded segments of an airing (run by the job scheduler)
    Fuse(FuseArgs),
    /// Verify configuration, channel maps, directories and binaries
    Check,
    /// Delete the oldest recording logs when the logs directory is too large
    PruneLogs,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Guide file to read instead of {data_dir}/info_progs.json
    #[arg(long)]
    pub guide: Option<PathBuf>,
    /// Log the jobs without queuing them or touching stored state
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    pub title: String,
    pub provider: String,
    pub recorder: RecorderKind,
    pub url: String,
    /// Seconds to record
    pub duration: u64,
    /// original, backup or backup_2
    pub role: Role,
}

#[derive(Args, Debug)]
pub struct FuseArgs {
    pub title: String,
    #[arg(long)]
    pub primary: Option<String>,
    #[arg(long)]
    pub backup: Option<String>,
    #[arg(long)]
    pub backup2: Option<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    let logs_dir = context.bundle.iptv.paths.logs_dir.clone();

    match &cli.command {
        Commands::Schedule(args) => {
            let _guard = logging::init_file_logging(&logs_dir, "cron_launch_record.log")?;
            let summary = context.schedule(args).await?;
            render(&summary, cli.format)?;
        }
        Commands::Record(args) => {
            let log_name = format!("record_{}_{}.log", sanitize_title(&args.title), args.role.tag());
            let _guard = logging::init_file_logging(&logs_dir, &log_name)?;
            let outcome = context.record(args).await?;
            render(&outcome, cli.format)?;
        }
        Commands::Fuse(args) => {
            let _guard = logging::init_file_logging(&logs_dir, "fusion.log")?;
            let outcome = context.fuse(args).await?;
            render(&outcome, cli.format)?;
        }
        Commands::Check => {
            logging::init_stderr_logging()?;
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::PruneLogs => {
            logging::init_stderr_logging()?;
            let report = context.prune_logs();
            render(&report, cli.format)?;
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .canonicalize()
            .unwrap_or_else(|_| cli.config.clone());
        let bundle = ConfigBundle::from_path(&config_path)?;
        Ok(Self {
            bundle,
            config_path,
        })
    }

    fn job_program(&self) -> Result<PathBuf> {
        match &self.bundle.iptv.binaries.iptvctl {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }

    fn open_ledger(&self) -> Result<SqliteBusyLedger> {
        let path = self.bundle.iptv.ledger_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let ledger = SqliteBusyLedger::new(&path)?;
        ledger.initialize()?;
        Ok(ledger)
    }

    fn stored_busy_entries(&self) -> Result<Vec<BusyEntry>> {
        let path = self.bundle.iptv.ledger_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let ledger = SqliteBusyLedger::builder().path(path).read_only(true).build()?;
        Ok(ledger.entries()?)
    }

    async fn schedule(&self, args: &ScheduleArgs) -> Result<ScheduleSummary> {
        let iptv = &self.bundle.iptv;
        let pruned = prune_logs(&iptv.paths.logs_dir, iptv.logs.max_dir_bytes);
        if !pruned.removed.is_empty() {
            info!(removed = pruned.removed.len(), "logs directory pruned");
        }

        let guide_path = args.guide.clone().unwrap_or_else(|| iptv.guide_path());
        let airings = guide::load_airings(&guide_path)?;
        let role_sets = iptv.role_sets()?;
        let now = Local::now().naive_local();

        let busy: Arc<dyn BusyLedger>;
        let jobs: Arc<dyn JobScheduler>;
        if args.dry_run {
            busy = Arc::new(MemoryBusyLedger::from_entries(self.stored_busy_entries()?));
            jobs = Arc::new(DryRunScheduler);
        } else {
            busy = Arc::new(self.open_ledger()?);
            jobs = Arc::new(AtJobScheduler::new(
                &iptv.binaries.at,
                iptv.paths.data_dir.join("jobs"),
                None,
            ));
        }

        let pending = guide::pending_ends(iptv.guide_snapshot_path(), now)?;
        ledger::seed(busy.as_ref(), &role_sets, pending, now)?;

        let commands = JobCommands::new(self.job_program()?, &self.config_path, &iptv.paths.logs_dir);
        let scheduler = ProviderScheduler::new(
            role_sets,
            self.bundle.catalog.clone(),
            busy,
            jobs,
            commands,
        )
        .with_fusion_delay(iptv.fusion.delay_minutes);
        let report = scheduler.run(&airings, now).await?;

        if !args.dry_run {
            guide::save_snapshot(&guide_path, iptv.guide_snapshot_path())?;
        }
        info!(
            airings = report.airings,
            jobs = report.jobs.len(),
            dry_run = args.dry_run,
            "scheduling run finished"
        );
        Ok(ScheduleSummary {
            dry_run: args.dry_run,
            report,
        })
    }

    async fn record(&self, args: &RecordArgs) -> Result<RecordOutcome> {
        let iptv = &self.bundle.iptv;
        let max_streams = iptv.max_streams(&args.provider);
        if max_streams == 0 {
            return Err(RecorderError::UnknownProvider {
                provider: args.provider.clone(),
            }
            .into());
        }
        let recorder = SegmentRecorder::new(
            &iptv.paths.videos_dir,
            &iptv.paths.logs_dir,
            iptv.recorder.clone(),
            max_streams,
            Arc::new(ChildRecorderLauncher::new(iptv.binaries.clone())),
            Arc::new(SysinfoProcessTable),
        );
        let request = RecordRequest {
            title: args.title.clone(),
            provider: args.provider.clone(),
            recorder: args.recorder,
            url: args.url.clone(),
            duration_seconds: args.duration,
            role: args.role,
        };
        Ok(recorder.record(&request).await?)
    }

    async fn fuse(&self, args: &FuseArgs) -> Result<FusionOutcome> {
        let iptv = &self.bundle.iptv;
        let executor: Arc<dyn CommandExecutor> = Arc::new(SystemCommandExecutor);
        let merger = FusionMerger::new(
            &iptv.paths.videos_dir,
            &iptv.paths.logs_dir,
            &iptv.binaries.ffmpeg,
            iptv.fusion.clone(),
            Arc::new(FfprobeProbe::new(&iptv.binaries.ffprobe, Some(executor.clone()))),
            executor,
        );
        let request = FusionRequest {
            title: args.title.clone(),
            primary: args.primary.clone(),
            backup: args.backup.clone(),
            backup2: args.backup2.clone(),
        };
        Ok(merger.merge(&request).await?)
    }

    fn prune_logs(&self) -> PruneReport {
        let iptv = &self.bundle.iptv;
        prune_logs(&iptv.paths.logs_dir, iptv.logs.max_dir_bytes)
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let iptv = &self.bundle.iptv;
        let mut entries = vec![HealthEntry::ok(
            "config",
            format!("{}", self.config_path.display()),
        )];

        for provider in iptv.provider_ids() {
            let name = format!("provider {provider}");
            match self.bundle.catalog.get(&provider) {
                Some(map) => {
                    let invalid = map.invalid_urls();
                    if map.is_empty() {
                        entries.push(HealthEntry::warn(name, "no channels"));
                    } else if invalid.is_empty() {
                        entries.push(HealthEntry::ok(name, format!("{} channels", map.len())));
                    } else {
                        entries.push(HealthEntry::warn(
                            name,
                            format!("unparsable urls: {}", invalid.join(", ")),
                        ));
                    }
                }
                None => entries.push(HealthEntry::error(name, "channel map not loaded")),
            }
        }

        entries.push(check_directory("videos_dir", &iptv.paths.videos_dir));
        entries.push(check_directory("logs_dir", &iptv.paths.logs_dir));
        entries.push(check_directory("data_dir", &iptv.paths.data_dir));

        let mut binaries: Vec<(String, &Path)> = vec![
            ("ffmpeg".to_string(), iptv.binaries.ffmpeg.as_path()),
            ("ffprobe".to_string(), iptv.binaries.ffprobe.as_path()),
            ("at".to_string(), iptv.binaries.at.as_path()),
        ];
        let mut kinds: Vec<RecorderKind> = iptv
            .role_sets()
            .unwrap_or_default()
            .iter()
            .flat_map(|set| Role::ALL.map(|role| set.binding(role).map(|b| b.recorder)))
            .flatten()
            .filter(|kind| *kind != RecorderKind::Ffmpeg)
            .collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds.dedup();
        for kind in kinds {
            binaries.push((kind.to_string(), iptv.binaries.recorder(kind)));
        }
        for (name, path) in binaries {
            entries.push(match find_binary(path) {
                Some(found) => HealthEntry::ok(name, format!("{}", found.display())),
                None => HealthEntry::error(name, format!("{} not found", path.display())),
            });
        }

        let ledger_path = iptv.ledger_path();
        if ledger_path.exists() {
            let entry = match SqliteBusyLedger::builder()
                .path(&ledger_path)
                .read_only(true)
                .build()
                .and_then(|ledger| ledger.entries())
            {
                Ok(rows) => HealthEntry::ok("busy ledger", format!("{} entries", rows.len())),
                Err(err) => HealthEntry::error("busy ledger", format!("{err}")),
            };
            entries.push(entry);
        } else {
            entries.push(HealthEntry::warn(
                "busy ledger",
                format!("{} not created yet", ledger_path.display()),
            ));
        }

        let guide_path = iptv.guide_path();
        entries.push(match guide::load_airings(&guide_path) {
            Ok(airings) => HealthEntry::ok("guide", format!("{} airings", airings.len())),
            Err(err) => HealthEntry::warn("guide", format!("{err}")),
        });

        entries
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(name, format!("{} is not a directory", path.display())),
        Err(_) => HealthEntry::warn(name, format!("{} missing", path.display())),
    }
}

/// Resolves a configured binary the way the shell would.
fn find_binary(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Serialize)]
pub struct ScheduleSummary {
    pub dry_run: bool,
    #[serde(flatten)]
    pub report: ScheduleReport,
}

impl DisplayFallback for ScheduleSummary {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{} airing(s), {} duplicate(s), {} job(s){}",
            self.report.airings,
            self.report.duplicates,
            self.report.jobs.len(),
            if self.dry_run { " [dry run]" } else { "" }
        )];
        for job in &self.report.jobs {
            let what = match job.job {
                JobKind::Record(role) => format!("record {role}"),
                JobKind::Fusion => "fusion".to_string(),
            };
            lines.push(format!(
                "{at} {what:<16} {title} {provider}{queued}",
                at = format_stamp(job.at),
                title = job.title,
                provider = job.provider.as_deref().unwrap_or(""),
                queued = if job.queued { "" } else { " (not queued)" },
            ));
        }
        for title in &self.report.unrecorded {
            lines.push(format!("no provider available: {title}"));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for RecordOutcome {
    fn display(&self) -> String {
        match self {
            RecordOutcome::Rejected { running, max } => {
                format!("rejected: {running} recording(s) running for a limit of {max}")
            }
            RecordOutcome::Completed { segments, started } => {
                format!("recorded {} segment(s), {} started", segments, started.len())
            }
        }
    }
}

impl DisplayFallback for FusionOutcome {
    fn display(&self) -> String {
        match self {
            FusionOutcome::Aborted { contributing } => {
                format!("fusion skipped: {contributing} role(s) produced usable segments")
            }
            FusionOutcome::Merged {
                timeline,
                complete,
                outputs,
                report,
                removed,
            } => {
                let mut lines = vec![format!(
                    "{} ({} segment(s), {} file(s) published, {} removed)",
                    if *complete {
                        "recording OK"
                    } else {
                        "discontinuity"
                    },
                    timeline.segments.len(),
                    outputs.len(),
                    removed.len()
                )];
                lines.extend(outputs.iter().map(|path| format!("  {}", path.display())));
                lines.push(format!("report: {}", report.display()));
                lines.join("\n")
            }
        }
    }
}

impl DisplayFallback for PruneReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "logs: {} -> {} bytes, {} file(s) removed",
            self.size_before,
            self.size_after,
            self.removed.len()
        )];
        lines.extend(self.removed.iter().map(|path| format!("  {}", path.display())));
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}
