//! Connection lifecycle management.
//!
//! [`ServiceHandle`] owns at most one live link. Each successful connect
//! starts a new generation with its own [`Correlator`], so a reply can only
//! ever be matched against requests submitted on the same link. When the
//! link dies, everything pending on it fails and the next request
//! reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::ServiceError;
use crate::transport::{Connector, Inbound, Link};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No live link.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Linked to the service.
    Connected {
        /// Generation of the live link.
        generation: u64,
    },
}

enum Slot {
    Disconnected,
    Connecting,
    Connected {
        correlator: Arc<Correlator>,
        reader: JoinHandle<()>,
    },
}

/// Resets a `Connecting` slot when the connect attempt ends without a link.
struct ConnectingGuard<'a>(&'a Mutex<Slot>);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.0.lock();
        if matches!(*slot, Slot::Connecting) {
            *slot = Slot::Disconnected;
        }
    }
}

/// Lazily connected, self-healing handle to the service.
pub struct ServiceHandle {
    connector: Arc<dyn Connector>,
    slot: Arc<Mutex<Slot>>,
    connect_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    max_retries: u32,
    initial_retry_delay: Duration,
}

impl ServiceHandle {
    /// Create a handle. No connection is made until first use.
    pub fn new(connector: Arc<dyn Connector>, config: &ClientConfig) -> Self {
        Self {
            connector,
            slot: Arc::new(Mutex::new(Slot::Disconnected)),
            connect_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            max_retries: config.connect_retries,
            initial_retry_delay: config.connect_retry_delay,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        match &*self.slot.lock() {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Connected { correlator, .. } if correlator.is_closed() => {
                ConnectionState::Disconnected
            }
            Slot::Connected { correlator, .. } => ConnectionState::Connected {
                generation: correlator.generation(),
            },
        }
    }

    /// Number of links established so far. The live link, if any, has this generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Endpoint description from the connector.
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    fn live(&self) -> Option<Arc<Correlator>> {
        match &*self.slot.lock() {
            Slot::Connected { correlator, .. } if !correlator.is_closed() => {
                Some(Arc::clone(correlator))
            }
            _ => None,
        }
    }

    /// Correlator of the live link, connecting first if necessary.
    pub async fn correlator(&self) -> Result<Arc<Correlator>, ServiceError> {
        if let Some(correlator) = self.live() {
            return Ok(correlator);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(correlator) = self.live() {
            return Ok(correlator);
        }

        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Connecting);
        if let Slot::Connected { correlator, reader } = previous {
            reader.abort();
            correlator.close("superseded by reconnect");
        }

        // Falls back to Disconnected on failure or if this future is dropped mid-connect.
        let _connecting = ConnectingGuard(&self.slot);
        let link = self.connect_with_retries().await?;
        Ok(self.install(link))
    }

    fn install(&self, link: Link) -> Arc<Correlator> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let correlator = Correlator::new(generation, link.outbound);
        let reader = tokio::spawn(route_replies(
            link.inbound,
            Arc::clone(&correlator),
            Arc::clone(&self.slot),
        ));
        *self.slot.lock() = Slot::Connected {
            correlator: Arc::clone(&correlator),
            reader,
        };
        tracing::info!(generation, endpoint = %self.connector.endpoint(), "connected to vault service");
        correlator
    }

    async fn connect_with_retries(&self) -> Result<Link, ServiceError> {
        let mut delay = self.initial_retry_delay;
        let mut attempt = 0;

        loop {
            match self.connector.connect().await {
                Ok(link) => return Ok(link),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, ?delay, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::warn!(attempts = attempt + 1, error = %e, "could not reach vault service");
                    return Err(e);
                }
            }
        }
    }

    /// Drop the live link, failing everything pending on it.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Disconnected);
        if let Slot::Connected { correlator, reader } = previous {
            reader.abort();
            let failed = correlator.close("disconnected by client");
            tracing::debug!(generation = correlator.generation(), failed, "disconnected");
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Feed replies from one link into its correlator until the link dies.
async fn route_replies(
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    correlator: Arc<Correlator>,
    slot: Arc<Mutex<Slot>>,
) {
    let reason = loop {
        match inbound.recv().await {
            Some(Inbound::Reply(frame)) => {
                correlator.resolve(frame);
            }
            Some(Inbound::Closed(reason)) => break reason,
            None => break "transport dropped".to_string(),
        }
    };

    let failed = correlator.close(&reason);
    tracing::warn!(
        generation = correlator.generation(),
        failed,
        %reason,
        "vault service connection lost"
    );

    let mut slot = slot.lock();
    if matches!(&*slot, Slot::Connected { correlator: live, .. } if Arc::ptr_eq(live, &correlator)) {
        *slot = Slot::Disconnected;
    }
}
