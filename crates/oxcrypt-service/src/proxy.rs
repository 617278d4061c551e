//! High-level client for the vault mount service.
//!
//! [`ServiceProxy`] ties together the connection handle, the per-generation
//! correlator and the session manager. Each operation validates locally,
//! submits one request with its deadline and interprets the reply.
//!
//! # Example
//!
//! ```no_run
//! use oxcrypt_service::{ClientConfig, ServiceProxy};
//! use secrecy::SecretString;
//!
//! # async fn run() -> Result<(), oxcrypt_service::ServiceError> {
//! let proxy = ServiceProxy::unix(ClientConfig::default());
//! let password = SecretString::from("my-password");
//! let mountpoint = proxy.mount(std::path::Path::new("/path/to/vault"), password).await?;
//! println!("Mounted at: {}", mountpoint.display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use secrecy::SecretString;
use tracing::instrument;

use crate::config::ClientConfig;
use crate::connection::{ConnectionState, ServiceHandle};
use crate::correlator::Correlator;
use crate::error::ServiceError;
use crate::mount_table::{MountRecord, ReconcileReport};
use crate::protocol::{MountStats, RequestKind, ServiceReply, ServiceRequest};
use crate::session::{SessionManager, validate_password, validate_path};
use crate::transport::Connector;

/// Client for the privileged vault mount service.
///
/// Thread-safe; share it behind an `Arc`. Operations may run concurrently
/// and their replies are matched independently.
pub struct ServiceProxy {
    handle: ServiceHandle,
    sessions: SessionManager,
    config: ClientConfig,
    reconciled_generation: AtomicU64,
}

impl ServiceProxy {
    /// Create a proxy reaching the service through `connector`.
    pub fn new(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        Self {
            handle: ServiceHandle::new(connector, &config),
            sessions: SessionManager::new(),
            config,
            reconciled_generation: AtomicU64::new(0),
        }
    }

    /// Create a proxy using the Unix socket from `config`.
    #[cfg(unix)]
    pub fn unix(config: ClientConfig) -> Self {
        let connector = crate::transport::UnixSocketConnector::new(config.socket_path.clone());
        Self::new(Arc::new(connector), config)
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Session manager owning the mount table.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Snapshot of locally known mounts. Does not contact the service.
    pub fn mounts(&self) -> Vec<MountRecord> {
        self.sessions.table().list()
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Number of links established so far.
    pub fn generation(&self) -> u64 {
        self.handle.generation()
    }

    /// Drop the connection, failing anything in flight.
    pub fn disconnect(&self) {
        self.handle.disconnect();
    }

    /// Live correlator, reconciling the mount table on a fresh reconnect.
    async fn connection(&self) -> Result<Arc<Correlator>, ServiceError> {
        let correlator = self.handle.correlator().await?;
        let generation = correlator.generation();
        let previous = self
            .reconciled_generation
            .fetch_max(generation, Ordering::SeqCst);

        if previous < generation && generation > 1 && self.config.reconcile_on_reconnect {
            match self.refresh(&correlator).await {
                Ok(report) => tracing::info!(
                    generation,
                    added = report.added.len(),
                    removed = report.removed.len(),
                    "reconciled mounts after reconnect"
                ),
                Err(e) => tracing::warn!(generation, error = %e, "reconcile after reconnect failed"),
            }
        }
        Ok(correlator)
    }

    async fn call(
        &self,
        correlator: &Arc<Correlator>,
        request: ServiceRequest,
    ) -> Result<ServiceReply, ServiceError> {
        let deadline = self.config.timeout_for(request.kind());
        let reply = correlator.submit(request, Some(deadline))?.wait().await?;
        match reply {
            ServiceReply::Error(error) => Err(ServiceError::from_wire(&error)),
            reply => Ok(reply),
        }
    }

    async fn refresh(&self, correlator: &Arc<Correlator>) -> Result<ReconcileReport, ServiceError> {
        let listed_since = Utc::now();
        match self.call(correlator, ServiceRequest::ListMounts).await? {
            ServiceReply::Mounts { mounts } => Ok(self.sessions.reconcile(mounts, listed_since)),
            other => Err(unexpected(RequestKind::ListMounts, &other)),
        }
    }

    /// Mount a vault. Returns the mountpoint chosen by the service.
    #[instrument(skip_all, fields(vault = %vault_path.display()))]
    pub async fn mount(
        &self,
        vault_path: &Path,
        password: SecretString,
    ) -> Result<PathBuf, ServiceError> {
        validate_password(&password)?;
        let ticket = self.sessions.begin_mount(vault_path)?;

        let correlator = self.connection().await?;
        let request = ServiceRequest::Mount {
            vault_path: vault_path.to_path_buf(),
            password,
        };
        match self.call(&correlator, request).await? {
            ServiceReply::Mounted { mountpoint } => Ok(ticket.complete(mountpoint)?.mountpoint),
            other => Err(unexpected(RequestKind::Mount, &other)),
        }
    }

    /// Unmount the vault at `mountpoint`.
    #[instrument(skip_all, fields(mountpoint = %mountpoint.display()))]
    pub async fn unmount(&self, mountpoint: &Path) -> Result<(), ServiceError> {
        let ticket = self.sessions.begin_unmount(mountpoint)?;

        let result = match self.connection().await {
            Ok(correlator) => {
                let request = ServiceRequest::Unmount {
                    mountpoint: mountpoint.to_path_buf(),
                };
                self.call(&correlator, request).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(ServiceReply::Unmounted) => {
                ticket.complete();
                Ok(())
            }
            Ok(other) => {
                let error = unexpected(RequestKind::Unmount, &other);
                ticket.abort(&error);
                Err(error)
            }
            Err(error) => {
                ticket.abort(&error);
                Err(error)
            }
        }
    }

    /// Ask the service for its mounts and make the local table match.
    #[instrument(skip(self))]
    pub async fn list_mounts(&self) -> Result<Vec<MountRecord>, ServiceError> {
        let correlator = self.connection().await?;
        let report = self.refresh(&correlator).await?;
        if !report.is_unchanged() {
            tracing::debug!(
                added = report.added.len(),
                removed = report.removed.len(),
                "mount table updated from service"
            );
        }
        Ok(self.mounts())
    }

    /// Statistics for a mount this client knows about.
    ///
    /// Does not change local state.
    #[instrument(skip_all, fields(mountpoint = %mountpoint.display()))]
    pub async fn get_stats(&self, mountpoint: &Path) -> Result<MountStats, ServiceError> {
        validate_path(mountpoint)?;
        if !self.sessions.table().contains(mountpoint) {
            return Err(ServiceError::NotMounted(mountpoint.to_path_buf()));
        }

        let correlator = self.handle.correlator().await?;
        let request = ServiceRequest::GetStats {
            mountpoint: mountpoint.to_path_buf(),
        };
        match self.call(&correlator, request).await? {
            ServiceReply::Stats { stats } => Ok(stats),
            other => Err(unexpected(RequestKind::GetStats, &other)),
        }
    }

    /// Whether the service answers. Never fails; any error reads as `false`.
    pub async fn ping(&self) -> bool {
        let deadline = self.config.timeout_for(RequestKind::Ping);
        match tokio::time::timeout(deadline, self.try_ping()).await {
            Ok(Ok(alive)) => alive,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "ping failed");
                false
            }
            Err(_) => {
                tracing::debug!(?deadline, "ping timed out");
                false
            }
        }
    }

    async fn try_ping(&self) -> Result<bool, ServiceError> {
        let correlator = self.handle.correlator().await?;
        match self.call(&correlator, ServiceRequest::Ping).await? {
            ServiceReply::Pong { alive } => Ok(alive),
            other => Err(unexpected(RequestKind::Ping, &other)),
        }
    }
}

fn unexpected(kind: RequestKind, reply: &ServiceReply) -> ServiceError {
    let variant = match reply {
        ServiceReply::Mounted { .. } => "mounted",
        ServiceReply::Unmounted => "unmounted",
        ServiceReply::Mounts { .. } => "mounts",
        ServiceReply::Stats { .. } => "stats",
        ServiceReply::Pong { .. } => "pong",
        ServiceReply::Error(_) => "error",
    };
    ServiceError::Protocol(format!("unexpected '{variant}' reply to {kind}"))
}
