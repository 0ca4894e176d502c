pub mod cleanup;
pub mod error;
pub mod probe;
pub mod timeline;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::FusionSection;
use crate::exec::CommandExecutor;
use crate::naming::{trimmed_name, SaveLayout};
use crate::recorder::read_start_ledger;
use crate::roles::Role;

pub use cleanup::{clean_save_dir, housekeeping_candidates, resolves_within};
pub use error::{FusionError, FusionResult};
pub use probe::{parse_probe_output, FfprobeProbe, MediaInfo, MediaProbe};
pub use timeline::{cut_point, stitch, MergedTimeline, Segment};

/// Providers that recorded each role of one airing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionRequest {
    pub title: String,
    pub primary: Option<String>,
    pub backup: Option<String>,
    pub backup2: Option<String>,
}

impl FusionRequest {
    fn roles(&self) -> impl Iterator<Item = (Role, &str)> {
        [
            (Role::Primary, self.primary.as_deref()),
            (Role::Backup, self.backup.as_deref()),
            (Role::Backup2, self.backup2.as_deref()),
        ]
        .into_iter()
        .filter_map(|(role, provider)| provider.map(|provider| (role, provider)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FusionOutcome {
    /// Fewer than two roles produced a viable segment.
    Aborted { contributing: usize },
    Merged {
        timeline: MergedTimeline,
        complete: bool,
        outputs: Vec<PathBuf>,
        report: PathBuf,
        removed: Vec<PathBuf>,
    },
}

/// Rebuilds one continuous recording from the segments of up to three roles.
pub struct FusionMerger {
    videos_dir: PathBuf,
    logs_dir: PathBuf,
    ffmpeg: PathBuf,
    settings: FusionSection,
    probe: Arc<dyn MediaProbe>,
    executor: Arc<dyn CommandExecutor>,
}

impl FusionMerger {
    pub fn new(
        videos_dir: impl Into<PathBuf>,
        logs_dir: impl Into<PathBuf>,
        ffmpeg: impl Into<PathBuf>,
        settings: FusionSection,
        probe: Arc<dyn MediaProbe>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            videos_dir: videos_dir.into(),
            logs_dir: logs_dir.into(),
            ffmpeg: ffmpeg.into(),
            settings,
            probe,
            executor,
        }
    }

    pub async fn merge(&self, request: &FusionRequest) -> FusionResult<FusionOutcome> {
        let layout = SaveLayout::new(&self.videos_dir, &request.title);

        let mut pool = Vec::new();
        let mut contributing = 0;
        for (role, provider) in request.roles() {
            let viable = self.viable_segments(&layout, provider, role).await;
            if viable.is_empty() {
                info!(title = %layout.title(), provider, role = %role, "no viable segment");
                continue;
            }
            contributing += 1;
            pool.extend(viable);
        }
        if contributing < 2 {
            info!(title = %layout.title(), contributing, "not enough sources to merge");
            return Ok(FusionOutcome::Aborted { contributing });
        }

        let timeline = stitch(pool);
        let sequence = self.trim_seams(&timeline).await;

        let to_watch = layout.to_watch_dir();
        tokio::fs::create_dir_all(&to_watch)
            .await
            .map_err(|source| FusionError::Output {
                path: to_watch.clone(),
                source,
            })?;
        let mut outputs = Vec::new();
        for (rank, source) in sequence.iter().enumerate() {
            let Some(name) = source.file_name() else {
                continue;
            };
            let target = to_watch.join(format!("{}_{}", rank + 1, name.to_string_lossy()));
            match tokio::fs::copy(source, &target).await {
                Ok(_) => outputs.push(target),
                Err(err) => {
                    warn!(source = %source.display(), target = %target.display(), error = %err, "copy failed")
                }
            }
        }

        let complete = timeline.is_complete(self.settings.discontinuity_tolerance_seconds);
        let report = layout.report_path();
        let body = render_report(layout.title(), &timeline, complete);
        tokio::fs::write(&report, body)
            .await
            .map_err(|source| FusionError::Output {
                path: report.clone(),
                source,
            })?;
        info!(
            title = %layout.title(),
            segments = timeline.segments.len(),
            complete,
            "merge finished"
        );

        let removed = clean_save_dir(
            layout.save_dir(),
            &self.videos_dir,
            self.settings.duplicate_size_limit,
        );

        Ok(FusionOutcome::Merged {
            timeline,
            complete,
            outputs,
            report,
            removed,
        })
    }

    /// Segments of one role paired with their ledger start, probed, and
    /// kept when at least `min_segment_seconds` long.
    async fn viable_segments(&self, layout: &SaveLayout, provider: &str, role: Role) -> Vec<Segment> {
        let files = match layout.list_segments(provider, role) {
            Ok(files) => files,
            Err(err) => {
                warn!(dir = %layout.save_dir().display(), error = %err, "cannot list segments");
                return Vec::new();
            }
        };
        if files.is_empty() {
            return Vec::new();
        }
        let ledger = layout.start_ledger_path(provider, role);
        let starts = match read_start_ledger(&ledger) {
            Ok(starts) => starts,
            Err(err) => {
                warn!(path = %ledger.display(), error = %err, "cannot read start times");
                return Vec::new();
            }
        };
        if starts.len() != files.len() {
            warn!(
                provider,
                role = %role,
                files = files.len(),
                starts = starts.len(),
                "segment and start time counts differ"
            );
        }

        let mut viable = Vec::new();
        for (path, start) in files.into_iter().zip(starts) {
            let info = self.probe.probe(&path).await;
            let segment = Segment::new(path, role, start, info.duration.trunc() as i64);
            if segment.duration < self.settings.min_segment_seconds {
                info!(path = %segment.path.display(), duration = segment.duration, "segment too short");
                continue;
            }
            viable.push(segment);
        }
        viable
    }

    /// Files to publish: the first segment untouched, then every following
    /// segment cut past its overlap with the previous one.
    async fn trim_seams(&self, timeline: &MergedTimeline) -> Vec<PathBuf> {
        let mut sequence: Vec<PathBuf> = timeline
            .segments
            .first()
            .map(|first| vec![first.path.clone()])
            .unwrap_or_default();
        for pair in timeline.segments.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            let diff = previous.end() - next.start;
            let info = self.probe.probe(&next.path).await;
            let seek = cut_point(
                diff,
                info.start_time,
                self.settings.min_time,
                self.settings.safe_time,
            );
            let output = trimmed_name(&next.path);
            info!(segment = %next.path.display(), diff, seek, "cutting overlap");
            self.cut(&next.path, seek, &output).await;
            sequence.push(output);
        }
        sequence
    }

    async fn cut(&self, input: &Path, seek: i64, output: &Path) {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-seek_timestamp")
            .arg("1")
            .arg("-ss")
            .arg(seek.to_string())
            .arg("-i")
            .arg(input)
            .arg("-y")
            .arg("-c")
            .arg("copy")
            .arg("-copyts")
            .arg("-to")
            .arg("10000000")
            .arg("-muxdelay")
            .arg("0")
            .arg(output)
            .arg("-loglevel")
            .arg("quiet");
        let mut log = Vec::new();
        match self.executor.run(&mut command).await {
            Ok(result) => {
                log.extend_from_slice(&result.stdout);
                log.extend_from_slice(&result.stderr);
                if !result.status.success() {
                    warn!(input = %input.display(), status = ?result.status.code(), "cut failed");
                    log.extend_from_slice(
                        format!("\nffmpeg failed for {} with {}\n", input.display(), result.status)
                            .as_bytes(),
                    );
                }
            }
            Err(err) => warn!(input = %input.display(), error = %err, "ffmpeg failed to run"),
        }
        if log.is_empty() {
            return;
        }
        if let Err(err) = append_split_log(&self.logs_dir.join("split_infos.log"), &log).await {
            warn!(error = %err, "cannot write split log");
        }
    }
}

async fn append_split_log(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await
}

pub fn render_report(title: &str, timeline: &MergedTimeline, complete: bool) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "{title}");
    if complete {
        let _ = writeln!(body, "recording OK");
    } else {
        let _ = writeln!(
            body,
            "discontinuity: coverage ends {}s before the latest recorded end",
            timeline.max_known_end - timeline.last_end().unwrap_or(0)
        );
    }
    for segment in &timeline.segments {
        let _ = writeln!(
            body,
            "{} {} {}-{}",
            segment.role,
            segment
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            timeline.offset(segment.start),
            timeline.offset(segment.end()),
        );
    }
    body
}
