//! Client configuration.
//!
//! Loaded from `<config dir>/oxcrypt/service.toml` when present. Every
//! field has a default, so an empty or missing file yields the stock
//! configuration. The socket path can be overridden with
//! `OXCRYPT_SERVICE_SOCKET`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::RequestKind;

/// Environment variable overriding the service socket path.
pub const SOCKET_ENV: &str = "OXCRYPT_SERVICE_SOCKET";

/// Socket file name inside the runtime directory.
pub const SOCKET_NAME: &str = "oxcrypt-service.sock";

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Mount deadline.
    #[serde(with = "humantime_serde")]
    pub mount: Duration,
    /// Unmount deadline.
    #[serde(with = "humantime_serde")]
    pub unmount: Duration,
    /// ListMounts deadline.
    #[serde(with = "humantime_serde")]
    pub list_mounts: Duration,
    /// GetStats deadline.
    #[serde(with = "humantime_serde")]
    pub get_stats: Duration,
    /// Ping deadline.
    #[serde(with = "humantime_serde")]
    pub ping: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            mount: Duration::from_secs(30),
            unmount: Duration::from_secs(30),
            list_mounts: Duration::from_secs(10),
            get_stats: Duration::from_secs(10),
            ping: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// Deadline for `kind`.
    pub fn for_kind(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Mount => self.mount,
            RequestKind::Unmount => self.unmount,
            RequestKind::ListMounts => self.list_mounts,
            RequestKind::GetStats => self.get_stats,
            RequestKind::Ping => self.ping,
        }
    }
}

/// Settings for talking to the vault service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Unix socket the service listens on.
    pub socket_path: PathBuf,
    /// Request deadlines.
    pub timeouts: Timeouts,
    /// Connection attempts after the first before giving up.
    pub connect_retries: u32,
    /// Delay before the first retry, doubled after each attempt.
    #[serde(with = "humantime_serde")]
    pub connect_retry_delay: Duration,
    /// Refresh the mount table from the service after reconnecting.
    pub reconcile_on_reconnect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            timeouts: Timeouts::default(),
            connect_retries: 3,
            connect_retry_delay: Duration::from_millis(100),
            reconcile_on_reconnect: true,
        }
    }
}

impl ClientConfig {
    /// Path of the default configuration file.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("com", "oxcrypt", "oxcrypt").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("service.toml"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load configuration from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Load `path` (or the default file) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => match Self::default_path() {
                Ok(path) => Self::load_from(&path)?,
                Err(ConfigError::NoConfigDir) => Self::default(),
                Err(e) => return Err(e),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `OXCRYPT_SERVICE_SOCKET` if set.
    pub fn apply_env(&mut self) {
        if let Some(socket) = std::env::var_os(SOCKET_ENV).filter(|s| !s.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
    }

    /// Deadline for `kind`.
    pub fn timeout_for(&self, kind: RequestKind) -> Duration {
        self.timeouts.for_kind(kind)
    }
}

/// Runtime directory if the platform has one, else the temp directory.
fn default_socket_path() -> PathBuf {
    ProjectDirs::from("com", "oxcrypt", "oxcrypt")
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}
