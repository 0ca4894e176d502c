use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Prefixes of per-recording log files that may be pruned.
pub const PRUNABLE_PREFIXES: [&str; 2] = ["record_", "infos_"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub size_before: u64,
    pub size_after: u64,
    pub removed: Vec<PathBuf>,
}

pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Deletes the oldest recording logs until `dir` is back under `max_bytes`.
pub fn prune_logs(dir: &Path, max_bytes: u64) -> PruneReport {
    let size_before = dir_size(dir);
    let mut report = PruneReport {
        size_before,
        size_after: size_before,
        removed: Vec::new(),
    };
    if size_before <= max_bytes {
        debug!(dir = %dir.display(), size = size_before, "logs directory within limit");
        return report;
    }

    let mut candidates: Vec<(SystemTime, u64, PathBuf)> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            PRUNABLE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        })
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, meta.len(), entry.into_path()))
        })
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

    for (_, size, path) in candidates {
        if report.size_after <= max_bytes {
            break;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), freed = size, "deleted old log");
                report.size_after = report.size_after.saturating_sub(size);
                report.removed.push(path);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "failed to delete log"),
        }
    }
    report
}
