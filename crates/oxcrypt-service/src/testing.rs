//! Scriptable in-process vault service for tests and local development.
//!
//! [`FakeVaultService`] keeps its mounts in memory and assigns mountpoints
//! under `/Volumes` the way the real service does. Knobs let a test inject
//! latency, queued failures, unresponsiveness, and remote-side changes
//! that the client has not been told about.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};

use crate::protocol::{MountEntry, MountStats, RequestKind, ServiceErrorCode, WireError};
use crate::server::VaultService;

/// Root under which mountpoints are assigned.
pub const VOLUMES_ROOT: &str = "/Volumes";

#[derive(Debug, Clone)]
struct FakeMount {
    vault_path: PathBuf,
    mounted_at: DateTime<Utc>,
    stats: MountStats,
}

#[derive(Debug, Default)]
struct FakeState {
    vaults: HashMap<PathBuf, String>,
    mounts: BTreeMap<PathBuf, FakeMount>,
    latency: HashMap<RequestKind, Duration>,
    failures: HashMap<RequestKind, VecDeque<WireError>>,
    calls: HashMap<RequestKind, u64>,
    reuse_mountpoints: bool,
}

/// In-memory [`VaultService`].
#[derive(Debug, Default)]
pub struct FakeVaultService {
    state: Mutex<FakeState>,
    unresponsive: AtomicBool,
}

impl FakeVaultService {
    /// A service with no known vaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vault that can be mounted with `password`.
    #[must_use]
    pub fn with_vault(self, vault_path: impl Into<PathBuf>, password: &str) -> Self {
        self.add_vault(vault_path, password);
        self
    }

    /// Register a vault that can be mounted with `password`.
    pub fn add_vault(&self, vault_path: impl Into<PathBuf>, password: &str) {
        self.state
            .lock()
            .vaults
            .insert(vault_path.into(), password.to_string());
    }

    /// Delay every `kind` request by `latency`.
    pub fn set_latency(&self, kind: RequestKind, latency: Duration) {
        self.state.lock().latency.insert(kind, latency);
    }

    /// Fail the next `kind` request with `error`.
    pub fn fail_next(&self, kind: RequestKind, error: WireError) {
        self.state
            .lock()
            .failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Stop answering requests. Requests already waiting stay stuck.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Assign `/Volumes/<name>` even when another vault already has it.
    pub fn set_reuse_mountpoints(&self, reuse: bool) {
        self.state.lock().reuse_mountpoints = reuse;
    }

    /// Record a mount made behind the client's back.
    pub fn insert_mount(&self, vault_path: impl Into<PathBuf>, mountpoint: impl Into<PathBuf>) {
        self.state.lock().mounts.insert(
            mountpoint.into(),
            FakeMount {
                vault_path: vault_path.into(),
                mounted_at: Utc::now(),
                stats: MountStats::default(),
            },
        );
    }

    /// Forget a mount behind the client's back. Returns false if absent.
    pub fn remove_mount(&self, mountpoint: &Path) -> bool {
        self.state.lock().mounts.remove(mountpoint).is_some()
    }

    /// Account I/O against a mount.
    pub fn record_io(&self, mountpoint: &Path, bytes_read: u64, bytes_written: u64) {
        if let Some(mount) = self.state.lock().mounts.get_mut(mountpoint) {
            let stats = &mut mount.stats;
            stats.bytes_read += bytes_read;
            stats.bytes_written += bytes_written;
            stats.ops_count += 1;
            stats.last_access = Some(Utc::now());
        }
    }

    /// Mountpoints currently mounted, sorted.
    pub fn mountpoints(&self) -> Vec<PathBuf> {
        self.state.lock().mounts.keys().cloned().collect()
    }

    /// How many `kind` requests reached the service.
    pub fn call_count(&self, kind: RequestKind) -> u64 {
        self.state.lock().calls.get(&kind).copied().unwrap_or(0)
    }

    /// Count the call, apply latency and failure knobs.
    async fn enter(&self, kind: RequestKind) -> Result<(), WireError> {
        let latency = {
            let mut state = self.state.lock();
            *state.calls.entry(kind).or_default() += 1;
            state.latency.get(&kind).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unresponsive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let queued = self
            .state
            .lock()
            .failures
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn assign_mountpoint(state: &FakeState, vault_path: &Path) -> PathBuf {
        let name = vault_path
            .file_name()
            .map_or_else(|| "vault".to_string(), |n| n.to_string_lossy().into_owned());
        let base = Path::new(VOLUMES_ROOT).join(&name);
        if state.reuse_mountpoints || !state.mounts.contains_key(&base) {
            return base;
        }
        (1..)
            .map(|n| Path::new(VOLUMES_ROOT).join(format!("{name} {n}")))
            .find(|candidate| !state.mounts.contains_key(candidate))
            .unwrap_or(base)
    }

    fn do_mount(&self, vault_path: PathBuf, password: &SecretString) -> Result<PathBuf, WireError> {
        let mut state = self.state.lock();
        let display = vault_path.display().to_string();

        let Some(expected) = state.vaults.get(&vault_path) else {
            return Err(WireError::service(ServiceErrorCode::InvalidVault, display));
        };
        if expected.as_str() != password.expose_secret() {
            return Err(WireError::service(ServiceErrorCode::AuthFailed, "incorrect password"));
        }
        if state.mounts.values().any(|m| m.vault_path == vault_path) {
            return Err(WireError::service(ServiceErrorCode::AlreadyMounted, display));
        }

        let mountpoint = Self::assign_mountpoint(&state, &vault_path);
        state.mounts.insert(
            mountpoint.clone(),
            FakeMount {
                vault_path,
                mounted_at: Utc::now(),
                stats: MountStats::default(),
            },
        );
        Ok(mountpoint)
    }
}

impl VaultService for FakeVaultService {
    fn mount(
        &self,
        vault_path: PathBuf,
        password: SecretString,
    ) -> BoxFuture<'_, Result<PathBuf, WireError>> {
        Box::pin(async move {
            self.enter(RequestKind::Mount).await?;
            self.do_mount(vault_path, &password)
        })
    }

    fn unmount(&self, mountpoint: PathBuf) -> BoxFuture<'_, Result<(), WireError>> {
        Box::pin(async move {
            self.enter(RequestKind::Unmount).await?;
            if self.state.lock().mounts.remove(&mountpoint).is_some() {
                Ok(())
            } else {
                Err(WireError::service(
                    ServiceErrorCode::NotFound,
                    mountpoint.display().to_string(),
                ))
            }
        })
    }

    fn list_mounts(&self) -> BoxFuture<'_, Result<Vec<MountEntry>, WireError>> {
        Box::pin(async move {
            self.enter(RequestKind::ListMounts).await?;
            let state = self.state.lock();
            Ok(state
                .mounts
                .iter()
                .map(|(mountpoint, mount)| MountEntry {
                    vault_path: mount.vault_path.clone(),
                    mountpoint: mountpoint.clone(),
                    mounted_at: mount.mounted_at,
                    stats: mount.stats.clone(),
                })
                .collect())
        })
    }

    fn get_stats(&self, mountpoint: PathBuf) -> BoxFuture<'_, Result<MountStats, WireError>> {
        Box::pin(async move {
            self.enter(RequestKind::GetStats).await?;
            self.state
                .lock()
                .mounts
                .get(&mountpoint)
                .map(|m| m.stats.clone())
                .ok_or_else(|| {
                    WireError::service(ServiceErrorCode::NotFound, mountpoint.display().to_string())
                })
        })
    }

    fn ping(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.enter(RequestKind::Ping).await.is_ok() })
    }
}
