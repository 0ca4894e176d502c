use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

use super::{LedgerError, LedgerResult};

const BUSY_LEDGER_SCHEMA: &str = include_str!("../../../sql/busy_ledger.sql");

#[derive(Debug, Clone)]
pub struct SqliteBusyLedgerBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteBusyLedgerBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteBusyLedgerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> LedgerResult<SqliteBusyLedger> {
        let path = self.path.ok_or(LedgerError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        Ok(SqliteBusyLedger { path, flags })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusyEntry {
    pub rank: u8,
    pub provider: String,
    pub busy_until: NaiveDateTime,
}

/// Persisted busy-until timestamps keyed by (rank, provider).
#[derive(Debug, Clone)]
pub struct SqliteBusyLedger {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteBusyLedger {
    pub fn builder() -> SqliteBusyLedgerBuilder {
        SqliteBusyLedgerBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> LedgerResult<Self> {
        SqliteBusyLedgerBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> LedgerResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            LedgerError::OpenDatabase {
                path: self.path.clone(),
                source,
            }
        })?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;\nPRAGMA synchronous = NORMAL;\n")
            .map_err(|source| LedgerError::OpenDatabase {
                path: self.path.clone(),
                source,
            })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> LedgerResult<()> {
        let conn = self.open()?;
        conn.execute_batch(BUSY_LEDGER_SCHEMA)?;
        Ok(())
    }

    pub fn get(&self, rank: u8, provider: &str) -> LedgerResult<Option<NaiveDateTime>> {
        let conn = self.open()?;
        let value = conn
            .query_row(
                "SELECT busy_until FROM busy_ledger WHERE rank = ?1 AND provider = ?2",
                params![rank, provider],
                |row| row.get::<_, NaiveDateTime>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, rank: u8, provider: &str, busy_until: NaiveDateTime) -> LedgerResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO busy_ledger(rank, provider, busy_until)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(rank, provider) DO UPDATE SET
                busy_until = excluded.busy_until,
                updated_at = CURRENT_TIMESTAMP",
            params![rank, provider, busy_until],
        )?;
        Ok(())
    }

    pub fn entries(&self) -> LedgerResult<Vec<BusyEntry>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT rank, provider, busy_until FROM busy_ledger ORDER BY rank ASC, provider ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BusyEntry {
                    rank: row.get(0)?,
                    provider: row.get(1)?,
                    busy_until: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderBinding, RoleSet};
    use crate::ledger::seed;
    use crate::roles::RecorderKind;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn role_set(rank: u8, provider: Option<&str>) -> RoleSet {
        RoleSet {
            rank,
            primary: provider.map(|provider| ProviderBinding {
                provider: provider.to_string(),
                recorder: RecorderKind::Ffmpeg,
            }),
            backup: None,
            backup2: None,
        }
    }

    fn ledger() -> (tempfile::TempDir, SqliteBusyLedger) {
        let dir = tempdir().unwrap();
        let ledger = SqliteBusyLedger::new(dir.path().join("busy_ledger.sqlite")).unwrap();
        ledger.initialize().unwrap();
        (dir, ledger)
    }

    #[test]
    fn set_overwrites_and_entries_are_ordered() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.get(1, "alpha").unwrap(), None);
        ledger.set(2, "beta", at(22, 0)).unwrap();
        ledger.set(1, "alpha", at(21, 0)).unwrap();
        ledger.set(1, "alpha", at(21, 45)).unwrap();
        assert_eq!(ledger.get(1, "alpha").unwrap(), Some(at(21, 45)));
        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[1].provider, "beta");
    }

    #[test]
    fn seeding_persists_across_reopen() {
        let (dir, ledger) = ledger();
        let sets = vec![role_set(1, Some("alpha")), role_set(2, Some("beta"))];
        seed(&ledger, &sets, vec![at(22, 10)], at(21, 0)).unwrap();
        let reopened = SqliteBusyLedger::new(dir.path().join("busy_ledger.sqlite")).unwrap();
        assert_eq!(reopened.get(1, "alpha").unwrap(), Some(at(22, 10)));
        assert_eq!(reopened.get(2, "beta").unwrap(), Some(at(21, 0)));
    }

    #[test]
    fn read_only_without_file_fails_to_open() {
        let dir = tempdir().unwrap();
        let ledger = SqliteBusyLedger::builder()
            .path(dir.path().join("missing.sqlite"))
            .read_only(true)
            .build()
            .unwrap();
        assert!(matches!(
            ledger.get(1, "alpha"),
            Err(LedgerError::OpenDatabase { .. })
        ));
    }
}
