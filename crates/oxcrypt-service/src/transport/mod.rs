//! Transport capability for reaching the privileged service.
//!
//! The core never implements a wire transport directly. A [`Connector`]
//! produces a [`Link`]: an ordered, reliable pair of channels carrying
//! request frames out and reply frames (or a terminal failure) back in.
//! When the inbound side ends, the link is dead and every request still in
//! flight on it is failed.

use std::io;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

use crate::error::ServiceError;
use crate::protocol::{ReplyFrame, RequestFrame};

pub mod memory;
#[cfg(unix)]
pub mod unix;

pub use memory::MemoryConnector;
#[cfg(unix)]
pub use unix::UnixSocketConnector;

/// Events delivered from the transport to the client.
#[derive(Debug)]
pub enum Inbound {
    /// A reply for some request.
    Reply(ReplyFrame),
    /// The link failed; no further replies will arrive.
    Closed(String),
}

/// A live connection to the service.
#[derive(Debug)]
pub struct Link {
    /// Request frames to send, in order.
    pub outbound: mpsc::UnboundedSender<RequestFrame>,
    /// Replies and the terminal failure notification.
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Something that can open a [`Link`] to the service.
pub trait Connector: Send + Sync + 'static {
    /// Open a new link. Each call yields an independent connection.
    fn connect(&self) -> BoxFuture<'static, Result<Link, ServiceError>>;

    /// Human-readable description of the endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// Initial line buffer size. Request frames fit without reallocating, so
/// no stray copy of a password is left behind on the heap.
const LINE_CAPACITY: usize = 4096;

/// Encode a frame as a single newline-terminated JSON line.
///
/// The buffer is wiped when dropped since mount requests carry a password.
pub(crate) fn encode_line<T: Serialize>(frame: &T) -> io::Result<Zeroizing<Vec<u8>>> {
    let mut line = Zeroizing::new(Vec::with_capacity(LINE_CAPACITY));
    serde_json::to_writer(&mut *line, frame).map_err(io::Error::other)?;
    line.push(b'\n');
    Ok(line)
}

/// Decode one JSON line into a frame.
pub(crate) fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}
