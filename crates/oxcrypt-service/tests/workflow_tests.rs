//! End-to-end workflows through the proxy and an in-process service.

mod common;

use std::path::{Path, PathBuf};

use common::{TestService, VAULT_A, VAULT_B};
use oxcrypt_service::{ConnectionState, ServiceError, SessionState};

#[tokio::test]
async fn test_mount_stats_unmount_cycle() {
    let svc = TestService::new();

    let mountpoint = svc.mount_a().await.expect("mount failed");
    assert_eq!(mountpoint, PathBuf::from("/Volumes/a"));

    let stats = svc.proxy.get_stats(&mountpoint).await.expect("stats failed");
    assert_eq!(stats.bytes_read, 0);
    assert_eq!(stats.bytes_written, 0);

    svc.proxy.unmount(&mountpoint).await.expect("unmount failed");

    let err = svc.proxy.get_stats(&mountpoint).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotMounted(p) if p == mountpoint));
    assert!(svc.proxy.mounts().is_empty());
}

#[tokio::test]
async fn test_stats_reflect_service_io() {
    let svc = TestService::new();
    let mountpoint = svc.mount_a().await.unwrap();

    svc.service.record_io(&mountpoint, 4096, 1024);
    let stats = svc.proxy.get_stats(&mountpoint).await.unwrap();
    assert_eq!(stats.bytes_read, 4096);
    assert_eq!(stats.bytes_written, 1024);
    assert_eq!(stats.ops_count, 1);
}

#[tokio::test]
async fn test_list_mounts_returns_both_vaults() {
    let svc = TestService::new();
    svc.mount_a().await.unwrap();
    svc.mount_b().await.unwrap();

    let mounts = svc.proxy.list_mounts().await.unwrap();
    let pairs: Vec<_> = mounts
        .iter()
        .map(|m| (m.vault_path.clone(), m.mountpoint.clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (PathBuf::from(VAULT_A), PathBuf::from("/Volumes/a")),
            (PathBuf::from(VAULT_B), PathBuf::from("/Volumes/b")),
        ]
    );
}

#[tokio::test]
async fn test_remount_after_unmount() {
    let svc = TestService::new();
    let mountpoint = svc.mount_a().await.unwrap();
    svc.proxy.unmount(&mountpoint).await.unwrap();

    let again = svc.mount_a().await.unwrap();
    assert_eq!(again, mountpoint);
    assert_eq!(
        svc.proxy.sessions().vault_state(Path::new(VAULT_A)),
        SessionState::Mounted
    );
}

#[tokio::test]
async fn test_mounting_same_vault_twice_is_rejected_locally() {
    let svc = TestService::new();
    svc.mount_a().await.unwrap();

    let err = svc.mount_a().await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyMounted(_)));
    assert_eq!(
        svc.service.call_count(oxcrypt_service::RequestKind::Mount),
        1,
        "second mount must not reach the service"
    );
}

#[tokio::test]
async fn test_unknown_vault_is_remote_error() {
    let svc = TestService::new();
    let err = svc
        .proxy
        .mount(Path::new("/vaults/missing"), "pw".to_string().into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidPath(p) if p == Path::new("/vaults/missing")));
    assert!(svc.proxy.mounts().is_empty());
}

#[tokio::test]
async fn test_ping_connects_lazily() {
    let svc = TestService::new();
    assert_eq!(svc.proxy.connection_state(), ConnectionState::Disconnected);
    assert!(svc.proxy.ping().await);
    assert_eq!(
        svc.proxy.connection_state(),
        ConnectionState::Connected { generation: 1 }
    );
}
