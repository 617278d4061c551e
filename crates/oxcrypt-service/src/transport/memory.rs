//! In-process transport backed by channels.
//!
//! Serves requests against any [`VaultService`] on the current runtime.
//! The connector can sever the live link or refuse new ones, which lets
//! tests exercise connection loss deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Connector, Inbound, Link};
use crate::error::ServiceError;
use crate::server::{VaultService, serve_frames};

struct LiveLink {
    inbound: mpsc::UnboundedSender<Inbound>,
    task: JoinHandle<()>,
}

/// Connects to an in-process [`VaultService`].
pub struct MemoryConnector {
    service: Arc<dyn VaultService>,
    available: AtomicBool,
    connects: AtomicU64,
    live: Mutex<Option<LiveLink>>,
}

impl MemoryConnector {
    /// Create a connector serving `service`.
    pub fn new(service: Arc<dyn VaultService>) -> Self {
        Self {
            service,
            available: AtomicBool::new(true),
            connects: AtomicU64::new(0),
            live: Mutex::new(None),
        }
    }

    /// Refuse (or accept again) new connections.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Kill the current link as if the service process died.
    ///
    /// In-flight requests on the link never receive replies.
    /// Returns false if there was no live link.
    pub fn sever(&self, reason: &str) -> bool {
        let Some(live) = self.live.lock().take() else {
            return false;
        };
        live.task.abort();
        let _ = live.inbound.send(Inbound::Closed(reason.to_string()));
        tracing::debug!(%reason, "severed in-memory link");
        true
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Link, ServiceError>> {
        if !self.available.load(Ordering::SeqCst) {
            return Box::pin(async {
                Err(ServiceError::ServiceUnavailable(
                    "in-memory service refused the connection".to_string(),
                ))
            });
        }

        let (outbound, requests) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let replies = inbound_tx.clone();
        let task = tokio::spawn(serve_frames(
            Arc::clone(&self.service),
            requests,
            move |frame| {
                let _ = replies.send(Inbound::Reply(frame));
            },
        ));

        let previous = self.live.lock().replace(LiveLink {
            inbound: inbound_tx,
            task,
        });
        if let Some(previous) = previous {
            previous.task.abort();
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move { Ok(Link { outbound, inbound }) })
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}
