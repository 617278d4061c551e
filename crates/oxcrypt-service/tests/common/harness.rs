//! Test harness wiring a [`ServiceProxy`] to an in-process fake service.
//!
//! # Usage
//!
//! ```ignore
//! use crate::common::TestService;
//!
//! #[tokio::test]
//! async fn test_mount() {
//!     let svc = TestService::new();
//!     let mountpoint = svc.mount_a().await.unwrap();
//!     assert_eq!(mountpoint, std::path::PathBuf::from("/Volumes/a"));
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use oxcrypt_service::testing::FakeVaultService;
use oxcrypt_service::{ClientConfig, MemoryConnector, ServiceError, ServiceProxy, Timeouts};
use secrecy::SecretString;

/// First test vault.
pub const VAULT_A: &str = "/vaults/a";
/// Password of [`VAULT_A`].
pub const PASSWORD_A: &str = "pw1";
/// Second test vault.
pub const VAULT_B: &str = "/vaults/b";
/// Password of [`VAULT_B`].
pub const PASSWORD_B: &str = "pw2";

/// A proxy connected to a fake service through the in-memory transport.
pub struct TestService {
    /// The fake service, for knobs and inspection.
    pub service: Arc<FakeVaultService>,
    /// The connector, for severing and refusing links.
    pub connector: Arc<MemoryConnector>,
    /// The client under test.
    pub proxy: Arc<ServiceProxy>,
}

impl TestService {
    /// Two registered vaults and short timeouts.
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    /// Two registered vaults and the given configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        let service = Arc::new(
            FakeVaultService::new()
                .with_vault(VAULT_A, PASSWORD_A)
                .with_vault(VAULT_B, PASSWORD_B),
        );
        let connector = Arc::new(MemoryConnector::new(service.clone()));
        let proxy = Arc::new(ServiceProxy::new(connector.clone(), config));
        Self {
            service,
            connector,
            proxy,
        }
    }

    /// Configuration with timeouts short enough for tests.
    pub fn config() -> ClientConfig {
        ClientConfig {
            timeouts: Timeouts {
                mount: Duration::from_secs(2),
                unmount: Duration::from_secs(2),
                list_mounts: Duration::from_secs(2),
                get_stats: Duration::from_secs(2),
                ping: Duration::from_millis(500),
            },
            connect_retries: 1,
            connect_retry_delay: Duration::from_millis(5),
            ..ClientConfig::default()
        }
    }

    /// Mount [`VAULT_A`] with its password.
    pub async fn mount_a(&self) -> Result<PathBuf, ServiceError> {
        self.proxy
            .mount(Path::new(VAULT_A), SecretString::from(PASSWORD_A))
            .await
    }

    /// Mount [`VAULT_B`] with its password.
    pub async fn mount_b(&self) -> Result<PathBuf, ServiceError> {
        self.proxy
            .mount(Path::new(VAULT_B), SecretString::from(PASSWORD_B))
            .await
    }

    /// Mountpoints in the local table, sorted.
    pub fn local_mountpoints(&self) -> Vec<PathBuf> {
        self.proxy.mounts().into_iter().map(|r| r.mountpoint).collect()
    }
}

impl Default for TestService {
    fn default() -> Self {
        Self::new()
    }
}
