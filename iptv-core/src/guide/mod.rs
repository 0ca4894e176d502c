pub mod error;
pub mod models;
pub mod offsets;

use std::path::Path;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

pub use error::{GuideError, GuideResult};
pub use models::{format_stamp, parse_stamp, AiringRequest, DurationValue, GuideEntry};
pub use offsets::{backup2_start, backup_start, nudge_fusion, role_start, FusionSlots};

pub fn read_entries(path: impl AsRef<Path>) -> GuideResult<Vec<GuideEntry>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| GuideError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| GuideError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Airings of a guide file, in file order. Entries that do not describe a
/// valid airing are logged and skipped.
pub fn load_airings(path: impl AsRef<Path>) -> GuideResult<Vec<AiringRequest>> {
    let entries = read_entries(path)?;
    Ok(entries
        .iter()
        .filter_map(|entry| match AiringRequest::try_from(entry) {
            Ok(airing) => Some(airing),
            Err(reason) => {
                warn!(title = %entry.title, %reason, "skipping guide entry");
                None
            }
        })
        .collect())
}

/// Ends of the previous run's airings that are still in the future, in
/// snapshot order. A missing snapshot yields nothing.
pub fn pending_ends(snapshot: impl AsRef<Path>, now: NaiveDateTime) -> GuideResult<Vec<NaiveDateTime>> {
    let snapshot = snapshot.as_ref();
    if !snapshot.exists() {
        debug!(path = %snapshot.display(), "no guide snapshot");
        return Ok(Vec::new());
    }
    let entries = read_entries(snapshot)?;
    Ok(entries
        .iter()
        .filter_map(|entry| AiringRequest::try_from(entry).ok())
        .map(|airing| airing.end())
        .filter(|end| *end > now)
        .collect())
}

/// Keeps the guide just processed as the snapshot of the next run.
pub fn save_snapshot(guide: impl AsRef<Path>, snapshot: impl AsRef<Path>) -> GuideResult<()> {
    let guide = guide.as_ref();
    std::fs::copy(guide, snapshot.as_ref()).map_err(|source| GuideError::Io {
        path: guide.to_path_buf(),
        source,
    })?;
    Ok(())
}
