//! The proxy against a service listening on a real Unix socket.

#![cfg(unix)]

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{PASSWORD_A, TestService, VAULT_A};
use oxcrypt_service::testing::FakeVaultService;
use oxcrypt_service::{ClientConfig, ServiceError, ServiceProxy, bind_unix, serve_unix};
use secrecy::SecretString;
use tempfile::TempDir;
use tokio::task::JoinHandle;

struct SocketService {
    _dir: TempDir,
    socket: PathBuf,
    _server: JoinHandle<std::io::Result<()>>,
}

impl SocketService {
    fn start() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let socket = dir.path().join("service.sock");
        let listener = bind_unix(&socket).expect("Failed to bind socket");
        let service = Arc::new(FakeVaultService::new().with_vault(VAULT_A, PASSWORD_A));
        let server = tokio::spawn(serve_unix(listener, service));
        Self {
            _dir: dir,
            socket,
            _server: server,
        }
    }

    fn proxy(&self) -> ServiceProxy {
        ServiceProxy::unix(ClientConfig {
            socket_path: self.socket.clone(),
            ..TestService::config()
        })
    }
}

#[tokio::test]
async fn test_full_cycle_over_socket() {
    let svc = SocketService::start();
    let proxy = svc.proxy();

    assert!(proxy.ping().await);
    let mountpoint = proxy
        .mount(Path::new(VAULT_A), SecretString::from(PASSWORD_A))
        .await
        .unwrap();
    assert_eq!(mountpoint, PathBuf::from("/Volumes/a"));

    let stats = proxy.get_stats(&mountpoint).await.unwrap();
    assert_eq!(stats.bytes_read, 0);

    let mounts = proxy.list_mounts().await.unwrap();
    assert_eq!(mounts.len(), 1);

    proxy.unmount(&mountpoint).await.unwrap();
    let err = proxy.get_stats(&mountpoint).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotMounted(_)));
}

#[tokio::test]
async fn test_second_client_sees_mounts_after_listing() {
    let svc = SocketService::start();
    let first = svc.proxy();
    let second = svc.proxy();

    first
        .mount(Path::new(VAULT_A), SecretString::from(PASSWORD_A))
        .await
        .unwrap();
    assert!(second.mounts().is_empty());

    let mounts = second.list_mounts().await.unwrap();
    assert_eq!(mounts[0].vault_path, PathBuf::from(VAULT_A));
}

#[tokio::test]
async fn test_missing_socket_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let proxy = ServiceProxy::unix(ClientConfig {
        socket_path: dir.path().join("nope.sock"),
        ..TestService::config()
    });

    let err = proxy
        .mount(Path::new(VAULT_A), SecretString::from(PASSWORD_A))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ServiceUnavailable(_)));
    assert!(!proxy.ping().await);
}
