//! Error types for vault service operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{RequestKind, WireError};

/// Error domain used by the privileged service for its own error codes.
pub const SERVICE_ERROR_DOMAIN: &str = "com.agucova.oxcrypt.service";

/// Errors that can occur when talking to the vault mount service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The path is not absolute, empty, or contains interior NUL bytes.
    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// The password is empty or cannot be transmitted.
    #[error("invalid password format")]
    InvalidPassword,

    /// Authentication failed (wrong password or vault corrupted)
    #[error("authentication failed")]
    AuthFailure,

    /// The vault is already mounted, or a mount of it is in progress.
    #[error("already mounted: {}", .0.display())]
    AlreadyMounted(PathBuf),

    /// No mount is recorded at the given mountpoint.
    #[error("not mounted: {}", .0.display())]
    NotMounted(PathBuf),

    /// An unmount of this mountpoint is already in flight.
    #[error("unmount already in progress: {}", .0.display())]
    AlreadyUnmounting(PathBuf),

    /// The mount table already holds a record for this mountpoint.
    #[error("duplicate mount record: {}", .0.display())]
    DuplicateMount(PathBuf),

    /// Permission denied for the requested operation
    #[error("permission denied")]
    PermissionDenied,

    /// Rate limit exceeded (too many requests)
    #[error("rate limit exceeded, try again later")]
    RateLimited,

    /// Mount operation failed on the service side
    #[error("mount failed: {0}")]
    MountFailed(String),

    /// Unmount operation failed on the service side
    #[error("unmount failed: {0}")]
    UnmountFailed(String),

    /// Any other error reported by the service.
    #[error("service error: {0}")]
    Remote(String),

    /// The service could not be reached.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The connection died while the request was in flight.
    #[error("channel lost: {0}")]
    ChannelLost(String),

    /// The request deadline expired before a reply arrived.
    #[error("{kind} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        kind: RequestKind,
        /// Deadline that expired.
        after: Duration,
    },

    /// The reply did not match the request (wrong variant, bad payload).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Error taxonomy used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before submission; never reached the transport.
    Validation,
    /// Rejected locally because of mount-table state.
    LocalState,
    /// Reported by the remote service.
    Remote,
    /// The transport is down or died mid-request.
    Transport,
    /// Local deadline expiry.
    Timeout,
    /// Malformed or mismatched reply.
    Protocol,
}

impl ServiceError {
    /// Map a wire error from the service back to a typed error.
    pub fn from_wire(error: &WireError) -> Self {
        Self::from_code(error.code, &error.domain, &error.message)
    }

    /// Create an error from a service error code.
    pub fn from_code(code: i64, domain: &str, message: &str) -> Self {
        match (domain, code) {
            (SERVICE_ERROR_DOMAIN, 1) => Self::InvalidPath(PathBuf::from(message)),
            (SERVICE_ERROR_DOMAIN, 2) => Self::AuthFailure,
            (SERVICE_ERROR_DOMAIN, 3) => Self::MountFailed(message.to_string()),
            (SERVICE_ERROR_DOMAIN, 4) => Self::NotMounted(PathBuf::from(message)),
            (SERVICE_ERROR_DOMAIN, 5) => Self::PermissionDenied,
            (SERVICE_ERROR_DOMAIN, 6) => Self::RateLimited,
            (SERVICE_ERROR_DOMAIN, 7) => Self::Remote(message.to_string()),
            (SERVICE_ERROR_DOMAIN, 8) => Self::AlreadyMounted(PathBuf::from(message)),
            (SERVICE_ERROR_DOMAIN, 9) => Self::UnmountFailed(message.to_string()),
            ("NSPOSIXErrorDomain", _) => Self::Remote(format!("POSIX error {code}: {message}")),
            _ => Self::Remote(format!("{domain} ({code}): {message}")),
        }
    }

    /// Numeric code handed to C callers. Zero is reserved for success.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidPath(_) => 1,
            Self::AuthFailure => 2,
            Self::MountFailed(_) => 3,
            Self::NotMounted(_) => 4,
            Self::PermissionDenied => 5,
            Self::RateLimited => 6,
            Self::Remote(_) => 7,
            Self::AlreadyMounted(_) | Self::DuplicateMount(_) => 8,
            Self::UnmountFailed(_) => 9,
            Self::InvalidPassword => 10,
            Self::AlreadyUnmounting(_) => 11,
            Self::ServiceUnavailable(_) => 20,
            Self::ChannelLost(_) => 21,
            Self::Timeout { .. } => 22,
            Self::Protocol(_) => 23,
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidPath(_) | Self::InvalidPassword => ErrorClass::Validation,
            Self::AlreadyUnmounting(_) | Self::DuplicateMount(_) => ErrorClass::LocalState,
            Self::AuthFailure
            | Self::AlreadyMounted(_)
            | Self::NotMounted(_)
            | Self::PermissionDenied
            | Self::RateLimited
            | Self::MountFailed(_)
            | Self::UnmountFailed(_)
            | Self::Remote(_) => ErrorClass::Remote,
            Self::ServiceUnavailable(_) | Self::ChannelLost(_) => ErrorClass::Transport,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Protocol(_) => ErrorClass::Protocol,
        }
    }

    /// Returns true if the connection is gone (not merely slow).
    pub fn is_channel_lost(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::ChannelLost(_))
    }

    /// Returns true if this is a retryable error.
    ///
    /// The client never retries on its own; mounts are not idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable(_)
                | Self::ChannelLost(_)
                | Self::RateLimited
                | Self::Timeout { .. }
        )
    }
}

/// Errors loading client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`ClientConfig`](crate::ClientConfig).
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// No home directory could be determined.
    #[error("could not determine config directory")]
    NoConfigDir,
}
