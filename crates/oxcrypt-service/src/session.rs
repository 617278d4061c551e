//! Per-mount lifecycle tracking.
//!
//! A vault moves `Idle -> Mounting -> Mounted -> Unmounting -> Idle`.
//! Transitions are guarded by tickets: a [`MountTicket`] holds the vault in
//! `Mounting` and an [`UnmountTicket`] holds the mountpoint in `Unmounting`.
//! Dropping a ticket without completing it reverts the transition.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::{ErrorClass, ServiceError};
use crate::mount_table::{MountRecord, MountTable, ReconcileReport};
use crate::protocol::{MountEntry, MountStats};

/// Lifecycle state of one vault or mountpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not mounted.
    Idle,
    /// Mount request in flight.
    Mounting,
    /// Mounted and recorded in the table.
    Mounted,
    /// Unmount request in flight.
    Unmounting,
}

/// Owns the mount table and the in-flight transitions.
#[derive(Debug, Default)]
pub struct SessionManager {
    table: MountTable,
    mounting: DashSet<PathBuf>,
    unmounting: DashSet<PathBuf>,
}

impl SessionManager {
    /// Create a manager with an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the mount table.
    pub fn table(&self) -> &MountTable {
        &self.table
    }

    /// State of a mountpoint.
    pub fn mountpoint_state(&self, mountpoint: &Path) -> SessionState {
        if self.unmounting.contains(mountpoint) {
            SessionState::Unmounting
        } else if self.table.contains(mountpoint) {
            SessionState::Mounted
        } else {
            SessionState::Idle
        }
    }

    /// State of a vault.
    pub fn vault_state(&self, vault_path: &Path) -> SessionState {
        if self.mounting.contains(vault_path) {
            return SessionState::Mounting;
        }
        match self.table.find_by_vault(vault_path) {
            Some(record) => self.mountpoint_state(&record.mountpoint),
            None => SessionState::Idle,
        }
    }

    /// Move a vault from `Idle` to `Mounting`.
    pub fn begin_mount(&self, vault_path: &Path) -> Result<MountTicket<'_>, ServiceError> {
        validate_path(vault_path)?;

        if self.table.find_by_vault(vault_path).is_some() {
            return Err(ServiceError::AlreadyMounted(vault_path.to_path_buf()));
        }
        if !self.mounting.insert(vault_path.to_path_buf()) {
            return Err(ServiceError::AlreadyMounted(vault_path.to_path_buf()));
        }

        tracing::debug!(vault = %vault_path.display(), "mounting");
        Ok(MountTicket {
            sessions: self,
            vault_path: vault_path.to_path_buf(),
        })
    }

    /// Move a mountpoint from `Mounted` to `Unmounting`.
    pub fn begin_unmount(&self, mountpoint: &Path) -> Result<UnmountTicket<'_>, ServiceError> {
        validate_path(mountpoint)?;

        if !self.table.contains(mountpoint) {
            return Err(ServiceError::NotMounted(mountpoint.to_path_buf()));
        }
        if !self.unmounting.insert(mountpoint.to_path_buf()) {
            return Err(ServiceError::AlreadyUnmounting(mountpoint.to_path_buf()));
        }

        let ticket = UnmountTicket {
            sessions: self,
            mountpoint: mountpoint.to_path_buf(),
        };
        // The record may have been reconciled away before the flag was set.
        if !self.table.contains(mountpoint) {
            return Err(ServiceError::NotMounted(mountpoint.to_path_buf()));
        }

        tracing::debug!(mountpoint = %mountpoint.display(), "unmounting");
        Ok(ticket)
    }

    /// Replace the table with the service's listing, leaving in-flight
    /// transitions alone.
    pub(crate) fn reconcile(
        &self,
        remote: Vec<MountEntry>,
        listed_since: DateTime<Utc>,
    ) -> ReconcileReport {
        self.table.reconcile(remote, listed_since, |mountpoint, vault| {
            self.unmounting.contains(mountpoint) || self.mounting.contains(vault)
        })
    }
}

/// Holds a vault in `Mounting`.
#[derive(Debug)]
pub struct MountTicket<'a> {
    sessions: &'a SessionManager,
    vault_path: PathBuf,
}

impl MountTicket<'_> {
    /// The vault being mounted.
    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    /// `Mounting -> Mounted`: record the service-assigned mountpoint.
    ///
    /// Fails with `AlreadyMounted` if another mount already occupies it.
    pub fn complete(self, mountpoint: PathBuf) -> Result<MountRecord, ServiceError> {
        validate_path(&mountpoint).map_err(|_| {
            ServiceError::Protocol(format!(
                "service returned invalid mountpoint {}",
                mountpoint.display()
            ))
        })?;

        if self.sessions.unmounting.contains(&mountpoint) {
            return Err(ServiceError::AlreadyMounted(mountpoint));
        }

        let record = MountRecord {
            mountpoint,
            vault_path: self.vault_path.clone(),
            mounted_at: Utc::now(),
            stats: MountStats::default(),
        };
        self.sessions
            .table
            .insert(record.clone())
            .map_err(|_| ServiceError::AlreadyMounted(record.mountpoint.clone()))?;

        tracing::info!(
            vault = %record.vault_path.display(),
            mountpoint = %record.mountpoint.display(),
            "vault mounted"
        );
        Ok(record)
    }
}

impl Drop for MountTicket<'_> {
    fn drop(&mut self) {
        self.sessions.mounting.remove(&self.vault_path);
    }
}

/// Holds a mountpoint in `Unmounting`.
#[derive(Debug)]
pub struct UnmountTicket<'a> {
    sessions: &'a SessionManager,
    mountpoint: PathBuf,
}

impl UnmountTicket<'_> {
    /// The mountpoint being unmounted.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// `Unmounting -> Idle`: the service confirmed the unmount.
    pub fn complete(self) -> Option<MountRecord> {
        let record = self.sessions.table.remove(&self.mountpoint);
        tracing::info!(mountpoint = %self.mountpoint.display(), "vault unmounted");
        record
    }

    /// The unmount failed with `error`.
    ///
    /// If the connection died the service process is presumed gone along
    /// with its mounts, so the record is dropped. Otherwise the mount is
    /// still authoritative and returns to `Mounted`.
    pub fn abort(self, error: &ServiceError) {
        if matches!(error, ServiceError::ChannelLost(_)) {
            self.sessions.table.remove(&self.mountpoint);
            tracing::warn!(
                mountpoint = %self.mountpoint.display(),
                error = %error,
                "connection lost during unmount, dropping record"
            );
        } else if error.class() == ErrorClass::Timeout {
            tracing::warn!(
                mountpoint = %self.mountpoint.display(),
                "unmount timed out, mount kept"
            );
        }
    }
}

impl Drop for UnmountTicket<'_> {
    fn drop(&mut self) {
        self.sessions.unmounting.remove(&self.mountpoint);
    }
}

/// Reject paths that cannot name a vault or mountpoint.
pub fn validate_path(path: &Path) -> Result<(), ServiceError> {
    let valid = path
        .to_str()
        .is_some_and(|s| !s.is_empty() && !s.contains('\0'))
        && path.is_absolute();
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidPath(path.to_path_buf()))
    }
}

/// Reject passwords that cannot be sent.
pub fn validate_password(password: &SecretString) -> Result<(), ServiceError> {
    let secret = password.expose_secret();
    if secret.is_empty() || secret.contains('\0') {
        return Err(ServiceError::InvalidPassword);
    }
    Ok(())
}
