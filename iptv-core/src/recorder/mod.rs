pub mod command;
pub mod error;
pub mod process;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::RecorderSection;
use crate::naming::SaveLayout;
use crate::roles::{RecorderKind, Role};

pub use command::recorder_args;
pub use error::{RecorderError, RecorderResult};
pub use process::{
    count_provider_recordings, ChildProcess, ChildRecorderLauncher, LaunchSpec, ProcessTable,
    RecorderLauncher, RecorderProcess, SysinfoProcessTable,
};

/// One role's recording of one airing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRequest {
    pub title: String,
    pub provider: String,
    pub recorder: RecorderKind,
    pub url: String,
    pub duration_seconds: u64,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RecordOutcome {
    /// The provider already serves as many streams as it has role slots.
    Rejected { running: usize, max: usize },
    Completed {
        segments: u32,
        started: Vec<i64>,
    },
}

/// Drives one recorder for one role across the airing, rotating to a new
/// numbered segment whenever the current one dies or stops growing.
pub struct SegmentRecorder {
    videos_dir: PathBuf,
    logs_dir: PathBuf,
    settings: RecorderSection,
    max_streams: usize,
    launcher: Arc<dyn RecorderLauncher>,
    processes: Arc<dyn ProcessTable>,
}

impl SegmentRecorder {
    pub fn new(
        videos_dir: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        settings: RecorderSection,
        max_streams: usize,
        launcher: Arc<dyn RecorderLauncher>,
        processes: Arc<dyn ProcessTable>,
    ) -> Self {
        Self {
            videos_dir: videos_dir.into(),
            logs_dir: logs_dir.into(),
            settings,
            max_streams,
            launcher,
            processes,
        }
    }

    /// Concurrent recordings for the provider, this one included, against
    /// the number of role slots configured for it.
    pub fn admit(&self, provider: &str) -> Result<(), RecordOutcome> {
        let running = count_provider_recordings(&self.processes.command_lines(), provider);
        if running > self.max_streams {
            return Err(RecordOutcome::Rejected {
                running,
                max: self.max_streams,
            });
        }
        Ok(())
    }

    pub async fn record(&self, request: &RecordRequest) -> RecorderResult<RecordOutcome> {
        if let Err(rejected) = self.admit(&request.provider) {
            info!(
                title = %request.title,
                provider = %request.provider,
                role = %request.role,
                outcome = ?rejected,
                "not enough provider lines for this recording"
            );
            return Ok(rejected);
        }

        let deadline = Instant::now()
            .checked_add(Duration::from_secs(request.duration_seconds))
            .ok_or(RecorderError::DurationOutOfRange {
                seconds: request.duration_seconds,
            })?;

        let layout = SaveLayout::new(&self.videos_dir, &request.title);
        tokio::fs::create_dir_all(layout.save_dir())
            .await
            .map_err(|source| RecorderError::Prepare {
                path: layout.save_dir().to_path_buf(),
                source,
            })?;
        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|source| RecorderError::Prepare {
                path: self.logs_dir.clone(),
                source,
            })?;

        let settle = Duration::from_secs(self.settings.settle_seconds);
        let poll = Duration::from_secs(self.settings.poll_interval_seconds);
        let ledger = layout.start_ledger_path(&request.provider, request.role);

        let mut index: u32 = 0;
        let mut last_size: u64 = 0;
        let mut current: Option<Box<dyn RecorderProcess>> = None;
        let mut started = Vec::new();

        loop {
            let running = current.as_mut().is_some_and(|process| process.is_running());
            let size = file_size(&layout.segment_path(&request.provider, index, request.role)).await;

            let now = Instant::now();
            if now >= deadline {
                if let Some(mut process) = current.take() {
                    info!(title = %layout.title(), segment = index, "deadline reached, stopping recorder");
                    process.terminate().await;
                }
                break;
            }

            let stalled = request.recorder.reports_size() && size == last_size;
            if !running || stalled {
                info!(
                    title = %layout.title(),
                    provider = %request.provider,
                    role = %request.role,
                    segment = index,
                    running,
                    size,
                    last_size,
                    "starting a new segment"
                );
                if let Some(mut process) = current.take() {
                    process.terminate().await;
                }
                index += 1;
                let remaining = (deadline - now).as_secs_f64().round().max(1.0) as u64;
                let spec = LaunchSpec {
                    kind: request.recorder,
                    provider: request.provider.clone(),
                    url: request.url.clone(),
                    remaining_seconds: remaining,
                    output: layout.segment_path(&request.provider, index, request.role),
                    log_path: self.logs_dir.join(format!(
                        "infos_{}_{}_{index}_{}.log",
                        layout.title(),
                        request.provider,
                        request.role.tag()
                    )),
                };
                last_size = 0;
                match self.launcher.launch(&spec).await {
                    Ok(process) => {
                        current = Some(process);
                        sleep(settle).await;
                        if let Some(stamp) = self
                            .start_or_kill(&spec.output, &ledger, &mut current)
                            .await
                        {
                            started.push(stamp);
                            last_size = file_size(&spec.output).await;
                        }
                    }
                    Err(err) => {
                        warn!(
                            title = %layout.title(),
                            segment = index,
                            error = %err,
                            "failed to launch recorder"
                        );
                    }
                }
            } else {
                last_size = size;
            }

            sleep(poll).await;
        }

        info!(
            title = %layout.title(),
            provider = %request.provider,
            role = %request.role,
            segments = index,
            started = started.len(),
            "recording finished"
        );
        Ok(RecordOutcome::Completed {
            segments: index,
            started,
        })
    }

    /// Logs the start of a segment whose file appeared, or stops the recorder
    /// that failed to produce it.
    async fn start_or_kill(
        &self,
        output: &Path,
        ledger: &Path,
        current: &mut Option<Box<dyn RecorderProcess>>,
    ) -> Option<i64> {
        if tokio::fs::try_exists(output).await.unwrap_or(false) {
            let stamp = Utc::now().timestamp() - self.settings.settle_seconds as i64;
            if let Err(err) = append_line(ledger, &stamp.to_string()).await {
                warn!(path = %ledger.display(), error = %err, "failed to append start time");
            }
            info!(output = %output.display(), start = stamp, "segment started");
            return Some(stamp);
        }
        warn!(output = %output.display(), "segment file did not appear, stopping recorder");
        if let Some(mut process) = current.take() {
            process.terminate().await;
        }
        None
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0)
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await
}

/// Start times written by the recorder, one epoch second per line.
pub fn read_start_ledger(path: &Path) -> std::io::Result<Vec<i64>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}
