pub mod error;
pub mod store;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use tracing::debug;

use crate::config::RoleSet;

pub use error::{LedgerError, LedgerResult};
pub use store::{BusyEntry, SqliteBusyLedger, SqliteBusyLedgerBuilder};

/// Time before which a (rank, provider) pair is considered occupied.
pub trait BusyLedger: Send + Sync {
    fn busy_until(&self, rank: u8, provider: &str) -> LedgerResult<Option<NaiveDateTime>>;
    fn mark_busy(&self, rank: u8, provider: &str, until: NaiveDateTime) -> LedgerResult<()>;
}

impl BusyLedger for SqliteBusyLedger {
    fn busy_until(&self, rank: u8, provider: &str) -> LedgerResult<Option<NaiveDateTime>> {
        self.get(rank, provider)
    }

    fn mark_busy(&self, rank: u8, provider: &str, until: NaiveDateTime) -> LedgerResult<()> {
        self.set(rank, provider, until)
    }
}

/// In-memory ledger, used for dry runs on top of a copy of the stored entries.
#[derive(Debug, Default)]
pub struct MemoryBusyLedger {
    entries: Mutex<HashMap<(u8, String), NaiveDateTime>>,
}

impl MemoryBusyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = BusyEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|entry| ((entry.rank, entry.provider), entry.busy_until))
            .collect();
        Self {
            entries: Mutex::new(map),
        }
    }
}

impl BusyLedger for MemoryBusyLedger {
    fn busy_until(&self, rank: u8, provider: &str) -> LedgerResult<Option<NaiveDateTime>> {
        let entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        Ok(entries.get(&(rank, provider.to_string())).copied())
    }

    fn mark_busy(&self, rank: u8, provider: &str, until: NaiveDateTime) -> LedgerResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|poison| poison.into_inner());
        entries.insert((rank, provider.to_string()), until);
        Ok(())
    }
}

/// Carries recordings still running from the previous run into this one.
///
/// Each rank with a primary provider whose stored busy-until has already
/// passed takes the next pending end, or `now` when none are left.
pub fn seed(
    ledger: &dyn BusyLedger,
    role_sets: &[RoleSet],
    pending_ends: Vec<NaiveDateTime>,
    now: NaiveDateTime,
) -> LedgerResult<()> {
    let mut pending: VecDeque<NaiveDateTime> = pending_ends.into();
    for set in role_sets {
        let Some(primary) = set.primary.as_ref() else {
            continue;
        };
        if let Some(current) = ledger.busy_until(set.rank, &primary.provider)? {
            if current > now {
                debug!(rank = set.rank, provider = %primary.provider, busy_until = %current, "keeping stored busy-until");
                continue;
            }
        }
        let busy_until = pending.pop_front().unwrap_or(now);
        ledger.mark_busy(set.rank, &primary.provider, busy_until)?;
    }
    Ok(())
}
