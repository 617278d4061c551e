//! Wire protocol types for vault service communication.
//!
//! These types mirror the five operations of the privileged service
//! (`mount`, `unmount`, `listMounts`, `getStats`, `ping`). Every request is
//! wrapped in a [`RequestFrame`] carrying a [`RequestId`]; the service answers
//! with a [`ReplyFrame`] echoing the same id. Frames are encoded as one JSON
//! object per line.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::SERVICE_ERROR_DOMAIN;

/// Unique, unguessable identifier correlating a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh random request id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the raw UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0.simple())
    }
}

/// The five operations the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Mount a vault.
    Mount,
    /// Unmount a mountpoint.
    Unmount,
    /// List active mounts.
    ListMounts,
    /// Fetch statistics for a mount.
    GetStats,
    /// Liveness check.
    Ping,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::ListMounts => "listMounts",
            Self::GetStats => "getStats",
            Self::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Requests sent to the service.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceRequest {
    /// Mount a vault with the given path and password.
    Mount {
        /// Absolute path to the vault directory.
        vault_path: PathBuf,
        /// Vault password (zeroized when the frame is dropped).
        #[serde(serialize_with = "expose_password", deserialize_with = "secret_password")]
        password: SecretString,
    },

    /// Unmount a mounted vault by its mountpoint.
    Unmount {
        /// Mountpoint to unmount.
        mountpoint: PathBuf,
    },

    /// List all active mounts.
    ListMounts,

    /// Get statistics for a specific mount.
    GetStats {
        /// Mountpoint to get stats for.
        mountpoint: PathBuf,
    },

    /// Ping to check if the service is alive.
    Ping,
}

impl ServiceRequest {
    /// The operation this request performs.
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Mount { .. } => RequestKind::Mount,
            Self::Unmount { .. } => RequestKind::Unmount,
            Self::ListMounts => RequestKind::ListMounts,
            Self::GetStats { .. } => RequestKind::GetStats,
            Self::Ping => RequestKind::Ping,
        }
    }
}

fn expose_password<S: Serializer>(password: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(password.expose_secret())
}

fn secret_password<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// A request tagged with its correlation id.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, echoed by the reply.
    pub id: RequestId,
    /// The request body.
    pub body: ServiceRequest,
}

/// Replies from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ServiceReply {
    /// Mount succeeded, returns the service-assigned mountpoint.
    Mounted {
        /// The path where the vault is mounted.
        mountpoint: PathBuf,
    },

    /// Unmount succeeded.
    Unmounted,

    /// List of active mounts.
    Mounts {
        /// All currently active mount entries.
        mounts: Vec<MountEntry>,
    },

    /// Statistics for a mount.
    Stats {
        /// Opaque statistics blob.
        stats: MountStats,
    },

    /// Ping response.
    Pong {
        /// Whether the service is alive and responding.
        alive: bool,
    },

    /// Operation failed with an error.
    Error(WireError),
}

/// A reply tagged with the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Id of the request being answered.
    pub id: RequestId,
    /// The reply body.
    pub body: ServiceReply,
}

/// Error reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Error code within `domain`.
    pub code: i64,
    /// Error domain.
    pub domain: String,
    /// Human-readable message.
    pub message: String,
}

impl WireError {
    /// Error in the service's own domain.
    pub fn service(code: ServiceErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i64,
            domain: SERVICE_ERROR_DOMAIN.to_string(),
            message: message.into(),
        }
    }
}

/// Error codes of the service's own domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum ServiceErrorCode {
    /// Path is not a valid vault.
    InvalidVault = 1,
    /// Wrong password.
    AuthFailed = 2,
    /// Mount failed.
    MountFailed = 3,
    /// Mount not found.
    NotFound = 4,
    /// Caller not permitted.
    PermissionDenied = 5,
    /// Too many requests.
    RateLimited = 6,
    /// Internal service failure.
    Internal = 7,
    /// Vault already mounted.
    AlreadyMounted = 8,
    /// Unmount failed.
    UnmountFailed = 9,
}

/// A mount entry returned from ListMounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountEntry {
    /// Path to the vault directory.
    pub vault_path: PathBuf,
    /// Mountpoint where the vault is mounted.
    pub mountpoint: PathBuf,
    /// When the vault was mounted.
    pub mounted_at: DateTime<Utc>,
    /// Statistics reported alongside the entry.
    #[serde(default)]
    pub stats: MountStats,
}

/// Per-mount statistics reported by the service.
///
/// The client does not interpret these beyond display; fields it does not
/// know about are kept in `extra` and passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountStats {
    /// Bytes read from the vault.
    #[serde(default)]
    pub bytes_read: u64,
    /// Bytes written to the vault.
    #[serde(default)]
    pub bytes_written: u64,
    /// Currently open handles.
    #[serde(default)]
    pub open_handles: u64,
    /// Number of files opened.
    #[serde(default)]
    pub files_opened: u64,
    /// Total number of operations.
    #[serde(default)]
    pub ops_count: u64,
    /// Last time the mount was accessed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_access: Option<DateTime<Utc>>,
    /// Fields not interpreted by the client.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("req-"));
    }

    #[test]
    fn test_mount_request_wire_shape() {
        let frame = RequestFrame {
            id: RequestId::generate(),
            body: ServiceRequest::Mount {
                vault_path: PathBuf::from("/vaults/a"),
                password: SecretString::from("pw1"),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["body"]["op"], "mount");
        assert_eq!(json["body"]["vault_path"], "/vaults/a");
        assert_eq!(json["body"]["password"], "pw1");
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let request = ServiceRequest::Mount {
            vault_path: PathBuf::from("/vaults/a"),
            password: SecretString::from("hunter2"),
        };
        let debug = format!("{request:?}");
        assert!(!debug.contains("hunter2"));
        assert_eq!(request.kind(), RequestKind::Mount);
    }

    #[test]
    fn test_stats_pass_through_unknown_fields() {
        let json = r#"{"bytesRead": 10, "cacheHits": 7, "backend": "fskit"}"#;
        let stats: MountStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.bytes_read, 10);
        assert_eq!(stats.bytes_written, 0);
        assert_eq!(stats.extra["cacheHits"], 7);

        let back = serde_json::to_value(&stats).unwrap();
        assert_eq!(back["backend"], "fskit");
    }

    #[test]
    fn test_error_reply_decodes() {
        let id = RequestId::generate();
        let frame = ReplyFrame {
            id,
            body: ServiceReply::Error(WireError::service(ServiceErrorCode::AuthFailed, "bad")),
        };
        let line = serde_json::to_string(&frame).unwrap();
        let decoded: ReplyFrame = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.id, id);
        assert!(matches!(decoded.body, ServiceReply::Error(ref e) if e.code == 2));
    }
}
