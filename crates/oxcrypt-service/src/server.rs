//! Service side of the protocol.
//!
//! [`VaultService`] is the operation surface of the privileged mount
//! service. [`serve_frames`] dispatches request frames against it with each
//! request running concurrently, so replies may come back in any order.
//! [`serve_unix`] exposes a service on a Unix domain socket.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::protocol::{
    MountEntry, MountStats, ReplyFrame, RequestFrame, ServiceReply, ServiceRequest, WireError,
};

/// Operations of the privileged vault mount service.
pub trait VaultService: Send + Sync + 'static {
    /// Mount a vault and return the mountpoint the service chose.
    fn mount(
        &self,
        vault_path: PathBuf,
        password: SecretString,
    ) -> BoxFuture<'_, Result<PathBuf, WireError>>;

    /// Unmount the vault at `mountpoint`.
    fn unmount(&self, mountpoint: PathBuf) -> BoxFuture<'_, Result<(), WireError>>;

    /// List active mounts.
    fn list_mounts(&self) -> BoxFuture<'_, Result<Vec<MountEntry>, WireError>>;

    /// Statistics for the mount at `mountpoint`.
    fn get_stats(&self, mountpoint: PathBuf) -> BoxFuture<'_, Result<MountStats, WireError>>;

    /// Liveness check.
    fn ping(&self) -> BoxFuture<'_, bool>;
}

/// Run one request against the service and build its reply.
pub async fn dispatch(service: &dyn VaultService, request: ServiceRequest) -> ServiceReply {
    let result = match request {
        ServiceRequest::Mount {
            vault_path,
            password,
        } => service
            .mount(vault_path, password)
            .await
            .map(|mountpoint| ServiceReply::Mounted { mountpoint }),
        ServiceRequest::Unmount { mountpoint } => service
            .unmount(mountpoint)
            .await
            .map(|()| ServiceReply::Unmounted),
        ServiceRequest::ListMounts => service
            .list_mounts()
            .await
            .map(|mounts| ServiceReply::Mounts { mounts }),
        ServiceRequest::GetStats { mountpoint } => service
            .get_stats(mountpoint)
            .await
            .map(|stats| ServiceReply::Stats { stats }),
        ServiceRequest::Ping => Ok(ServiceReply::Pong {
            alive: service.ping().await,
        }),
    };

    result.unwrap_or_else(ServiceReply::Error)
}

/// Serve request frames until the request channel closes.
///
/// Requests still running when the channel closes are allowed to finish.
/// Aborting the task running this future cancels all of them.
pub async fn serve_frames<F>(
    service: Arc<dyn VaultService>,
    mut requests: mpsc::UnboundedReceiver<RequestFrame>,
    reply: F,
) where
    F: Fn(ReplyFrame) + Clone + Send + 'static,
{
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            frame = requests.recv() => {
                let Some(RequestFrame { id, body }) = frame else {
                    break;
                };
                let service = Arc::clone(&service);
                let reply = reply.clone();
                tasks.spawn(async move {
                    let kind = body.kind();
                    tracing::trace!(request_id = %id, %kind, "dispatching request");
                    let body = dispatch(service.as_ref(), body).await;
                    reply(ReplyFrame { id, body });
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    tracing::error!(error = %e, "request handler panicked");
                }
            }
        }
    }

    while tasks.join_next().await.is_some() {}
}

#[cfg(unix)]
pub use self::unix::{bind_unix, serve_unix};

#[cfg(unix)]
mod unix {
    use std::io;
    use std::path::Path;
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::sync::mpsc;

    use super::{VaultService, serve_frames};
    use crate::protocol::{ReplyFrame, RequestFrame};
    use crate::transport::{decode_line, encode_line};

    /// Bind a listener at `path`, replacing a stale socket file.
    pub fn bind_unix(path: &Path) -> io::Result<UnixListener> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(socket = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        UnixListener::bind(path)
    }

    /// Accept connections forever, serving each one concurrently.
    pub async fn serve_unix(listener: UnixListener, service: Arc<dyn VaultService>) -> io::Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            tracing::debug!("accepted service client");
            tokio::spawn(serve_connection(stream, Arc::clone(&service)));
        }
    }

    async fn serve_connection(stream: UnixStream, service: Arc<dyn VaultService>) {
        let (read_half, mut write_half) = stream.into_split();
        let (request_tx, request_rx) = mpsc::unbounded_channel::<RequestFrame>();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyFrame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = reply_rx.recv().await {
                let line = match encode_line(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(request_id = %frame.id, error = %e, "failed to encode reply");
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(&line).await {
                    tracing::debug!(error = %e, "client went away");
                    return;
                }
            }
        });

        let server = tokio::spawn(serve_frames(service, request_rx, move |frame| {
            let _ = reply_tx.send(frame);
        }));

        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match decode_line::<RequestFrame>(&line) {
                    Ok(frame) => {
                        if request_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "discarding malformed request frame"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "client read failed");
                    break;
                }
            }
        }

        drop(request_tx);
        let _ = server.await;
        let _ = writer.await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::protocol::{RequestId, ServiceErrorCode};
    use crate::testing::FakeVaultService;

    #[tokio::test]
    async fn test_dispatch_mount_and_stats() {
        let service = FakeVaultService::new().with_vault("/vaults/a", "pw1");

        let reply = dispatch(
            &service,
            ServiceRequest::Mount {
                vault_path: PathBuf::from("/vaults/a"),
                password: SecretString::from("pw1"),
            },
        )
        .await;
        assert_eq!(
            reply,
            ServiceReply::Mounted {
                mountpoint: PathBuf::from("/Volumes/a")
            }
        );

        let reply = dispatch(
            &service,
            ServiceRequest::GetStats {
                mountpoint: PathBuf::from("/Volumes/a"),
            },
        )
        .await;
        assert!(matches!(reply, ServiceReply::Stats { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_reports_wire_errors() {
        let service = FakeVaultService::new();
        let reply = dispatch(
            &service,
            ServiceRequest::Unmount {
                mountpoint: PathBuf::from("/Volumes/nope"),
            },
        )
        .await;
        match reply {
            ServiceReply::Error(e) => assert_eq!(e.code, ServiceErrorCode::NotFound as i64),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serve_frames_replies_to_every_request() {
        let service: Arc<dyn VaultService> = Arc::new(FakeVaultService::new());
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();

        let server = tokio::spawn(serve_frames(service, request_rx, move |frame| {
            let _ = reply_tx.send(frame);
        }));

        let ids: Vec<_> = (0..5).map(|_| RequestId::generate()).collect();
        for id in &ids {
            request_tx
                .send(RequestFrame {
                    id: *id,
                    body: ServiceRequest::Ping,
                })
                .unwrap();
        }
        drop(request_tx);
        server.await.unwrap();

        let mut seen = Vec::new();
        while let Some(frame) = reply_rx.recv().await {
            seen.push(frame.id);
        }
        assert_eq!(seen.len(), ids.len());
        assert!(ids.iter().all(|id| seen.contains(id)));
    }

    #[tokio::test]
    async fn test_bind_unix_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.sock");
        std::fs::write(&path, b"stale").unwrap();
        let listener = bind_unix(&path).unwrap();
        assert!(Path::new(&path).exists());
        drop(listener);
    }
}
