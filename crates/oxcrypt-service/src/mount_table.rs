//! Client-side table of known mounts, keyed by mountpoint.
//!
//! Readers get cloned snapshots; mutation is reserved to the session
//! manager so that at most one record ever exists per mountpoint.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use crate::error::ServiceError;
use crate::protocol::{MountEntry, MountStats};

/// A mounted vault as known to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRecord {
    /// Service-assigned mountpoint.
    pub mountpoint: PathBuf,
    /// Vault directory.
    pub vault_path: PathBuf,
    /// When the mount was established.
    pub mounted_at: DateTime<Utc>,
    /// Last statistics seen for this mount.
    pub stats: MountStats,
}

impl From<MountEntry> for MountRecord {
    fn from(entry: MountEntry) -> Self {
        Self {
            mountpoint: entry.mountpoint,
            vault_path: entry.vault_path,
            mounted_at: entry.mounted_at,
            stats: entry.stats,
        }
    }
}

/// Outcome of replacing local state with the service's listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Mountpoints learned from the service.
    pub added: Vec<PathBuf>,
    /// Mountpoints present on both sides.
    pub refreshed: Vec<PathBuf>,
    /// Local records the service no longer reports.
    pub removed: Vec<PathBuf>,
    /// Mountpoints left alone because an operation on them is in flight.
    pub skipped: Vec<PathBuf>,
}

impl ReconcileReport {
    /// True when nothing was added or removed.
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Concurrent mount table.
#[derive(Debug, Default)]
pub struct MountTable {
    records: DashMap<PathBuf, MountRecord>,
}

impl MountTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the record at `mountpoint`.
    pub fn get(&self, mountpoint: &Path) -> Option<MountRecord> {
        self.records.get(mountpoint).map(|r| r.value().clone())
    }

    /// Whether a record exists at `mountpoint`.
    pub fn contains(&self, mountpoint: &Path) -> bool {
        self.records.contains_key(mountpoint)
    }

    /// Snapshot of the record for `vault_path`, if it is mounted.
    pub fn find_by_vault(&self, vault_path: &Path) -> Option<MountRecord> {
        self.records
            .iter()
            .find(|r| r.vault_path == vault_path)
            .map(|r| r.value().clone())
    }

    /// All records, sorted by mountpoint.
    pub fn list(&self) -> Vec<MountRecord> {
        let mut records: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
        records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn insert(&self, record: MountRecord) -> Result<(), ServiceError> {
        match self.records.entry(record.mountpoint.clone()) {
            Entry::Occupied(_) => Err(ServiceError::DuplicateMount(record.mountpoint)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    pub(crate) fn remove(&self, mountpoint: &Path) -> Option<MountRecord> {
        self.records.remove(mountpoint).map(|(_, record)| record)
    }

    /// Replace local records with the service's listing.
    ///
    /// `busy` marks mountpoints (or vaults) with an operation in flight;
    /// those are neither added, updated nor removed. Local records mounted at
    /// or after `listed_since` were created after the listing was requested
    /// and are kept even if the listing lacks them.
    pub(crate) fn reconcile<F>(
        &self,
        remote: Vec<MountEntry>,
        listed_since: DateTime<Utc>,
        busy: F,
    ) -> ReconcileReport
    where
        F: Fn(&Path, &Path) -> bool,
    {
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        for entry in remote {
            if !seen.insert(entry.mountpoint.clone()) {
                tracing::warn!(
                    mountpoint = %entry.mountpoint.display(),
                    "service listed a mountpoint twice, keeping the first entry"
                );
                continue;
            }
            if busy(&entry.mountpoint, &entry.vault_path) {
                report.skipped.push(entry.mountpoint);
                continue;
            }

            match self.records.entry(entry.mountpoint.clone()) {
                Entry::Occupied(mut slot) => {
                    let record = slot.get_mut();
                    record.vault_path = entry.vault_path;
                    record.stats = entry.stats;
                    report.refreshed.push(entry.mountpoint);
                }
                Entry::Vacant(slot) => {
                    tracing::info!(
                        mountpoint = %entry.mountpoint.display(),
                        vault = %entry.vault_path.display(),
                        "adopting mount reported by service"
                    );
                    report.added.push(entry.mountpoint.clone());
                    slot.insert(entry.into());
                }
            }
        }

        let stale: Vec<PathBuf> = self
            .records
            .iter()
            .filter(|r| !seen.contains(r.key()))
            .filter(|r| r.mounted_at < listed_since)
            .filter(|r| !busy(&r.mountpoint, &r.vault_path))
            .map(|r| r.key().clone())
            .collect();

        for mountpoint in stale {
            if self.records.remove(&mountpoint).is_some() {
                tracing::warn!(
                    mountpoint = %mountpoint.display(),
                    "dropping mount the service no longer reports"
                );
                report.removed.push(mountpoint);
            }
        }

        report
    }
}
