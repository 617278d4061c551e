//! Request/reply correlation for a single connection generation.
//!
//! Every submitted request gets a [`PendingRequest`] entry keyed by its
//! [`RequestId`]. An entry is resolved exactly once, by whichever of these
//! removes it from the pending map first:
//!
//! - a reply with a matching id ([`Correlator::resolve`])
//! - the request deadline ([`PendingReply::wait`])
//! - connection loss ([`Correlator::fail_all_pending`])
//!
//! Replies whose id is no longer pending are discarded with a warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::protocol::{ReplyFrame, RequestFrame, RequestId, RequestKind, ServiceReply, ServiceRequest};

type Completion = oneshot::Sender<Result<ServiceReply, ServiceError>>;

/// Bookkeeping for an in-flight request.
#[derive(Debug)]
pub struct PendingRequest {
    /// Operation of the request.
    pub kind: RequestKind,
    /// When it was submitted.
    pub submitted_at: Instant,
    completion: Completion,
}

#[derive(Debug, Default)]
struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
    closed: Option<String>,
}

#[derive(Debug, Default)]
struct CorrelatorStats {
    submitted: AtomicU64,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    discarded: AtomicU64,
}

/// Snapshot of correlator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorrelatorStatsSnapshot {
    /// Requests handed to the transport.
    pub submitted: u64,
    /// Requests completed by a reply.
    pub resolved: u64,
    /// Requests completed by their deadline.
    pub timed_out: u64,
    /// Requests failed by connection loss.
    pub failed: u64,
    /// Requests whose caller stopped waiting.
    pub cancelled: u64,
    /// Replies that matched no pending request.
    pub discarded: u64,
}

/// Pending-request table bound to one connection generation.
#[derive(Debug)]
pub struct Correlator {
    generation: u64,
    outbound: mpsc::UnboundedSender<RequestFrame>,
    pending: Mutex<PendingTable>,
    stats: CorrelatorStats,
}

impl Correlator {
    /// Create a correlator sending frames on `outbound`.
    pub fn new(generation: u64, outbound: mpsc::UnboundedSender<RequestFrame>) -> Arc<Self> {
        Arc::new(Self {
            generation,
            outbound,
            pending: Mutex::new(PendingTable::default()),
            stats: CorrelatorStats::default(),
        })
    }

    /// Connection generation this correlator belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of requests awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Whether the connection behind this correlator is gone.
    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed.is_some()
    }

    /// Why the connection was closed, if it was.
    pub fn close_reason(&self) -> Option<String> {
        self.pending.lock().closed.clone()
    }

    /// Register a request and hand it to the transport.
    ///
    /// The entry is in the table before the frame is sent, so a reply can
    /// never arrive ahead of its registration.
    pub fn submit(
        self: &Arc<Self>,
        request: ServiceRequest,
        deadline: Option<Duration>,
    ) -> Result<PendingReply, ServiceError> {
        let id = RequestId::generate();
        let kind = request.kind();
        let (completion, rx) = oneshot::channel();

        {
            let mut table = self.pending.lock();
            if let Some(reason) = &table.closed {
                return Err(ServiceError::ChannelLost(reason.clone()));
            }
            table.entries.insert(
                id,
                PendingRequest {
                    kind,
                    submitted_at: Instant::now(),
                    completion,
                },
            );
        }

        if self.outbound.send(RequestFrame { id, body: request }).is_err() {
            self.pending.lock().entries.remove(&id);
            return Err(ServiceError::ChannelLost("transport closed".to_string()));
        }

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(request_id = %id, %kind, generation = self.generation, "request submitted");

        Ok(PendingReply {
            id,
            kind,
            deadline,
            rx,
            correlator: Arc::clone(self),
            settled: false,
        })
    }

    /// Deliver a reply frame to its pending request.
    ///
    /// Returns false if no request with that id was pending.
    pub fn resolve(&self, frame: ReplyFrame) -> bool {
        let entry = self.pending.lock().entries.remove(&frame.id);
        let Some(entry) = entry else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            warn!(
                request_id = %frame.id,
                generation = self.generation,
                "discarding reply for unknown or already-resolved request"
            );
            return false;
        };

        self.stats.resolved.fetch_add(1, Ordering::Relaxed);
        debug!(
            request_id = %frame.id,
            kind = %entry.kind,
            generation = self.generation,
            elapsed_ms = entry.submitted_at.elapsed().as_millis(),
            "request resolved"
        );
        let _ = entry.completion.send(Ok(frame.body));
        true
    }

    /// Fail every pending request with a channel-lost error.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all_pending(&self, reason: &str) -> usize {
        let drained = std::mem::take(&mut self.pending.lock().entries);
        let count = drained.len();
        for (id, entry) in drained {
            debug!(request_id = %id, kind = %entry.kind, %reason, "failing pending request");
            let _ = entry
                .completion
                .send(Err(ServiceError::ChannelLost(reason.to_string())));
        }
        self.stats.failed.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Mark the connection dead and fail everything pending on it.
    ///
    /// Later submissions fail immediately.
    pub fn close(&self, reason: &str) -> usize {
        {
            let mut table = self.pending.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
        }
        self.fail_all_pending(reason)
    }

    /// Claim a request for timeout. False if something else already resolved it.
    fn expire(&self, id: RequestId) -> bool {
        let removed = self.pending.lock().entries.remove(&id).is_some();
        if removed {
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    fn forget(&self, id: RequestId) {
        if self.pending.lock().entries.remove(&id).is_some() {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %id, generation = self.generation, "caller stopped waiting");
        }
    }

    /// Snapshot of counters.
    pub fn stats(&self) -> CorrelatorStatsSnapshot {
        CorrelatorStatsSnapshot {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            resolved: self.stats.resolved.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Handle for awaiting the resolution of one submitted request.
///
/// Dropping it before resolution removes the pending entry, so a late
/// reply is discarded instead of leaking.
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    kind: RequestKind,
    deadline: Option<Duration>,
    rx: oneshot::Receiver<Result<ServiceReply, ServiceError>>,
    correlator: Arc<Correlator>,
    settled: bool,
}

impl PendingReply {
    /// Id of the request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Operation of the request.
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Wait for the request's single resolution.
    pub async fn wait(mut self) -> Result<ServiceReply, ServiceError> {
        let outcome = match self.deadline {
            None => (&mut self.rx).await,
            Some(after) => match tokio::time::timeout(after, &mut self.rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if self.correlator.expire(self.id) {
                        self.settled = true;
                        debug!(request_id = %self.id, kind = %self.kind, ?after, "request timed out");
                        return Err(ServiceError::Timeout {
                            kind: self.kind,
                            after,
                        });
                    }
                    // A reply or failure claimed the entry first; its value is already sent.
                    (&mut self.rx).await
                }
            },
        };

        self.settled = true;
        outcome.unwrap_or_else(|_| Err(ServiceError::ChannelLost("request abandoned".to_string())))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.settled {
            self.correlator.forget(self.id);
        }
    }
}
