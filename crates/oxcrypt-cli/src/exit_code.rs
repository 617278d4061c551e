//! Process exit codes.
//!
//! Scripts can rely on these staying stable across releases.

/// Command completed.
pub const SUCCESS: u8 = 0;
/// Unclassified failure, or a ping that got no answer.
pub const GENERAL_ERROR: u8 = 1;
/// Configuration file could not be read or parsed.
pub const CONFIG_ERROR: u8 = 2;
/// Wrong or empty passphrase.
pub const AUTH_FAILED: u8 = 3;
/// Mount or file not found.
pub const NOT_FOUND: u8 = 4;
/// Vault path rejected.
pub const VAULT_INVALID: u8 = 5;
pub const PERMISSION_DENIED: u8 = 6;
/// The service could not mount or unmount.
pub const MOUNT_FAILED: u8 = 7;
/// Service unreachable, connection lost, or rate limited.
pub const SERVICE_UNAVAILABLE: u8 = 8;
pub const TIMEOUT: u8 = 9;
/// Conflicting operation already in progress or already done.
pub const CONFLICT: u8 = 10;
/// Interrupted by the user.
pub const CANCELLED: u8 = 130;
