use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use crate::exec::{CommandExecutor, SystemCommandExecutor};

/// Container facts of one recorded file. Zero when probing fails.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaInfo {
    pub duration: f64,
    pub start_time: f64,
}

#[async_trait::async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaInfo;
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    start_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    start_time: Option<String>,
}

fn parse_seconds(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// Reads `format.duration` and the first stream's `start_time` from
/// ffprobe's JSON report.
pub fn parse_probe_output(stdout: &[u8]) -> Option<MediaInfo> {
    let output: ProbeOutput = serde_json::from_slice(stdout).ok()?;
    let duration = parse_seconds(output.format.duration.as_deref()).unwrap_or(0.0);
    let start_time = output
        .streams
        .first()
        .and_then(|stream| parse_seconds(stream.start_time.as_deref()))
        .or_else(|| parse_seconds(output.format.start_time.as_deref()))
        .unwrap_or(0.0);
    Some(MediaInfo {
        duration,
        start_time,
    })
}

pub struct FfprobeProbe {
    ffprobe: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl FfprobeProbe {
    pub fn new(ffprobe: impl Into<PathBuf>, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            executor: executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor)),
        }
    }
}

#[async_trait::async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> MediaInfo {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg("-hide_banner")
            .arg(path);
        let output = match self.executor.run(&mut command).await {
            Ok(output) => output,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ffprobe failed to run");
                return MediaInfo::default();
            }
        };
        if !output.status.success() {
            warn!(
                path = %path.display(),
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ffprobe failed"
            );
            return MediaInfo::default();
        }
        parse_probe_output(&output.stdout).unwrap_or_else(|| {
            warn!(path = %path.display(), "unreadable ffprobe output");
            MediaInfo::default()
        })
    }
}
