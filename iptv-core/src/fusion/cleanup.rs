use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

/// Files of the save directory that look like failed recordings: empty
/// files, and every file past the `duplicate_limit`-th of one exact size.
pub fn housekeeping_candidates(save_dir: &Path, duplicate_limit: usize) -> Vec<PathBuf> {
    let mut files: Vec<(u64, PathBuf)> = WalkDir::new(save_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let size = entry.metadata().ok()?.len();
            Some((size, entry.into_path()))
        })
        .collect();
    files.sort_by_key(|(size, _)| *size);

    let mut seen: HashMap<u64, usize> = HashMap::new();
    files
        .into_iter()
        .filter(|(size, _)| {
            if *size == 0 {
                return true;
            }
            let count = seen.entry(*size).or_insert(0);
            *count += 1;
            *count > duplicate_limit
        })
        .map(|(_, path)| path)
        .collect()
}

/// True when `path`, with every symlink resolved, lies inside `base`.
pub fn resolves_within(base: &Path, path: &Path) -> bool {
    let Ok(base) = base.canonicalize() else {
        return false;
    };
    match path.canonicalize() {
        Ok(resolved) => resolved.starts_with(&base),
        Err(_) => false,
    }
}

/// Removes housekeeping candidates that resolve inside `videos_dir`.
pub fn clean_save_dir(save_dir: &Path, videos_dir: &Path, duplicate_limit: usize) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in housekeeping_candidates(save_dir, duplicate_limit) {
        if !resolves_within(videos_dir, &path) {
            warn!(path = %path.display(), "skipping path outside videos directory");
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "removed");
                removed.push(path);
            }
            Err(err) => warn!(path = %path.display(), error = %err, "failed to remove"),
        }
    }
    removed
}
