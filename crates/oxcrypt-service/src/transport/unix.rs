//! Unix domain socket transport.
//!
//! Frames are newline-delimited JSON. Each connection gets a writer task
//! draining the outbound channel and a reader task forwarding decoded
//! replies; either side failing ends the link with [`Inbound::Closed`].

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use super::{decode_line, encode_line, Connector, Inbound, Link};
use crate::error::ServiceError;
use crate::protocol::{ReplyFrame, RequestFrame};

/// Connects to the service over a Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixSocketConnector {
    path: PathBuf,
}

impl UnixSocketConnector {
    /// Create a connector for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for UnixSocketConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Link, ServiceError>> {
        let path = self.path.clone();
        Box::pin(async move {
            let stream = UnixStream::connect(&path).await.map_err(|e| {
                ServiceError::ServiceUnavailable(format!("{}: {e}", path.display()))
            })?;
            tracing::debug!(socket = %path.display(), "connected to vault service");
            Ok(spawn_stream_link(stream))
        })
    }

    fn endpoint(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

/// Wrap a byte stream in a [`Link`], spawning its reader and writer tasks.
pub(crate) fn spawn_stream_link<S>(stream: S) -> Link
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();

    tokio::spawn(write_frames(write_half, outbound_rx, inbound_tx.clone()));
    tokio::spawn(read_frames(read_half, inbound_tx));

    Link { outbound, inbound }
}

async fn write_frames<W>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<RequestFrame>,
    inbound: mpsc::UnboundedSender<Inbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let id = frame.id;
        // The frame (and any password in it) is dropped right after encoding.
        let line = match encode_line(&frame) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(request_id = %id, error = %e, "failed to encode request");
                continue;
            }
        };
        drop(frame);

        if let Err(e) = writer.write_all(&line).await {
            let _ = inbound.send(Inbound::Closed(format!("write failed: {e}")));
            return;
        }
    }

    let _ = writer.shutdown().await;
}

async fn read_frames<R>(reader: R, inbound: mpsc::UnboundedSender<Inbound>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match decode_line::<ReplyFrame>(&line) {
                Ok(frame) => {
                    if inbound.send(Inbound::Reply(frame)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "discarding malformed reply frame");
                }
            },
            Ok(None) => break "service closed the connection".to_string(),
            Err(e) => break format!("read failed: {e}"),
        }
    };

    let _ = inbound.send(Inbound::Closed(reason));
}
