//! Client core for the privileged OxCrypt vault mount service.
//!
//! Unprivileged processes (the CLI, desktop shells, native hosts through
//! the C interface) ask a separate service to mount vaults on their behalf.
//! This crate is the client side of that conversation:
//!
//! - [`ServiceProxy`] exposes `mount`, `unmount`, `list_mounts`,
//!   `get_stats` and `ping` as async operations with per-operation deadlines.
//! - Replies are matched to requests by id, per connection generation, so
//!   concurrent operations never see each other's results and a reply can
//!   resolve its request at most once.
//! - A local [`MountTable`] tracks what is mounted and is reconciled with the
//!   service's listing after reconnects.
//! - The [`ffi`] module wraps the proxy in callback-style C entry points.
//!
//! The transport is pluggable through [`Connector`]. A Unix socket
//! transport with newline-delimited JSON frames is built in, and
//! [`MemoryConnector`] serves any [`VaultService`] in-process. The
//! `testing` feature adds `testing::FakeVaultService`, an in-memory stand-in
//! for the privileged service.
//!
//! ## Error Handling
//!
//! Every operation returns [`ServiceError`]. [`ServiceError::class`] tells
//! validation, local-state, remote, transport, timeout and protocol
//! failures apart. The client never retries a request on its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod ffi;
pub mod mount_table;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, Timeouts};
pub use connection::{ConnectionState, ServiceHandle};
pub use correlator::{Correlator, CorrelatorStatsSnapshot, PendingReply};
pub use error::{ConfigError, ErrorClass, ServiceError};
pub use mount_table::{MountRecord, MountTable, ReconcileReport};
pub use protocol::{
    MountEntry, MountStats, ReplyFrame, RequestFrame, RequestId, RequestKind, ServiceErrorCode,
    ServiceReply, ServiceRequest, WireError,
};
pub use proxy::ServiceProxy;
pub use server::{VaultService, dispatch, serve_frames};
#[cfg(unix)]
pub use server::{bind_unix, serve_unix};
pub use session::{SessionManager, SessionState};
pub use transport::{Connector, Inbound, Link, MemoryConnector};
#[cfg(unix)]
pub use transport::UnixSocketConnector;
