// SPDX-License-Identifier: Apache-2.0

//! Durable resource ledger - the sole source of truth between stages.
//!
//! One JSON file per resource kind under a ledger directory, so a partial
//! provisioning run leaves an inspectable trail and any stage can be re-run
//! after a process restart. Each write replaces the whole file atomically
//! (temp file + rename): a crash mid-write cannot leave a torn record
//! readable by a later stage.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LedgerError;
use crate::types::{ResourceKind, ResourceRecord, TestWindow};

const WINDOW_FILE: &str = "window.json";

/// File-backed ledger of provisioned resource identifiers.
#[derive(Debug, Clone)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    /// Open (creating if necessary) a ledger directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| LedgerError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn kind_path(&self, kind: ResourceKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.file_name()))
    }

    /// Append a record to its kind file. The write is synchronous and
    /// completes before this returns, so a dependent read in a later stage
    /// always observes it.
    pub fn record(&self, record: ResourceRecord) -> Result<(), LedgerError> {
        let mut records = self.get_all(record.kind)?;
        tracing::debug!(kind = %record.kind, identifier = %record.identifier, "recording resource");
        records.push(record.clone());
        self.write_atomic(&self.kind_path(record.kind), &records)
    }

    /// First record of a kind, if present. Singleton kinds (VPC, load
    /// balancer) have at most one.
    pub fn get(&self, kind: ResourceKind) -> Result<Option<ResourceRecord>, LedgerError> {
        Ok(self.get_all(kind)?.into_iter().next())
    }

    /// All records of a kind, in write order. Empty if the kind file does
    /// not exist.
    pub fn get_all(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>, LedgerError> {
        let path = self.kind_path(kind);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| LedgerError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Kinds that currently have at least one record.
    pub fn kinds_present(&self) -> Vec<ResourceKind> {
        ResourceKind::all()
            .iter()
            .copied()
            .filter(|kind| self.kind_path(*kind).exists())
            .collect()
    }

    /// Persist the test window for the metrics collector.
    pub fn save_window(&self, window: &TestWindow) -> Result<(), LedgerError> {
        self.write_atomic(&self.dir.join(WINDOW_FILE), window)
    }

    /// Load the persisted test window, if the test stage has run.
    pub fn load_window(&self) -> Result<Option<TestWindow>, LedgerError> {
        let path = self.dir.join(WINDOW_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| LedgerError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Remove every ledger file. Called only after a fully clean teardown.
    pub fn clear(&self) -> Result<(), LedgerError> {
        for kind in ResourceKind::all() {
            let path = self.kind_path(*kind);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| LedgerError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            }
        }
        let window = self.dir.join(WINDOW_FILE);
        if window.exists() {
            fs::remove_file(&window).map_err(|e| LedgerError::Io {
                path: window,
                source: e,
            })?;
        }
        Ok(())
    }

    /// Serialize to a temp file in the same directory, then rename over the
    /// target. Rename is atomic on the filesystems we care about.
    fn write_atomic<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| LedgerError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, path).map_err(|e| LedgerError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_record_round_trip_verbatim() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        let identifier = "arn:partition:compute:region:acct:function/bench-fn";
        ledger
            .record(ResourceRecord::new(ResourceKind::Function, identifier))
            .unwrap();

        let read = ledger.get(ResourceKind::Function).unwrap().unwrap();
        assert_eq!(read.identifier, identifier);
    }

    #[test]
    fn test_multiple_records_per_kind_preserve_order() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        ledger
            .record(ResourceRecord::new(ResourceKind::Subnet, "subnet-a"))
            .unwrap();
        ledger
            .record(ResourceRecord::new(ResourceKind::Subnet, "subnet-b"))
            .unwrap();

        let subnets = ledger.get_all(ResourceKind::Subnet).unwrap();
        assert_eq!(subnets.len(), 2);
        assert_eq!(subnets[0].identifier, "subnet-a");
        assert_eq!(subnets[1].identifier, "subnet-b");
    }

    #[test]
    fn test_missing_kind_reads_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        assert!(ledger.get(ResourceKind::LoadBalancer).unwrap().is_none());
        assert!(ledger.get_all(ResourceKind::Subnet).unwrap().is_empty());
        assert!(ledger.kinds_present().is_empty());
    }

    #[test]
    fn test_window_round_trip() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        assert!(ledger.load_window().unwrap().is_none());

        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        let window = TestWindow::new(start, end).unwrap();

        ledger.save_window(&window).unwrap();
        assert_eq!(ledger.load_window().unwrap().unwrap(), window);
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();

        ledger
            .record(ResourceRecord::new(ResourceKind::Vpc, "vpc-1"))
            .unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        ledger
            .save_window(&TestWindow::new(start, end).unwrap())
            .unwrap();

        ledger.clear().unwrap();
        assert!(ledger.kinds_present().is_empty());
        assert!(ledger.load_window().unwrap().is_none());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path()).unwrap();
        ledger
            .record(ResourceRecord::new(ResourceKind::Vpc, "vpc-1"))
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
