//! Concurrent operations through a single shared proxy.
//!
//! Focus areas:
//! - Independent mounts do not lose or duplicate records
//! - Racing mounts to one mountpoint leave exactly one record
//! - Per-mountpoint transitions reject overlapping operations
//! - Replies completing out of order reach the right callers

mod common;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::TestService;
use oxcrypt_service::testing::FakeVaultService;
use oxcrypt_service::{
    MemoryConnector, RequestKind, ServiceError, ServiceProxy, SessionState,
};
use secrecy::SecretString;

fn many_vaults(count: usize) -> (Arc<FakeVaultService>, Arc<ServiceProxy>) {
    let service = Arc::new(FakeVaultService::new());
    for i in 0..count {
        service.add_vault(format!("/vaults/v{i}"), &format!("pw{i}"));
    }
    let connector = Arc::new(MemoryConnector::new(service.clone()));
    let proxy = Arc::new(ServiceProxy::new(connector, TestService::config()));
    (service, proxy)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_mounts() {
    let (service, proxy) = many_vaults(32);
    service.set_latency(RequestKind::Mount, Duration::from_millis(10));

    let mut handles = Vec::new();
    for i in 0..32 {
        let proxy = proxy.clone();
        handles.push(tokio::spawn(async move {
            proxy
                .mount(
                    Path::new(&format!("/vaults/v{i}")),
                    SecretString::from(format!("pw{i}")),
                )
                .await
        }));
    }

    let mut mountpoints = HashSet::new();
    for handle in handles {
        let mountpoint = handle.await.unwrap().expect("mount failed");
        assert!(mountpoints.insert(mountpoint), "duplicate mountpoint returned");
    }

    let records = proxy.mounts();
    assert_eq!(records.len(), 32);
    let recorded: HashSet<_> = records.into_iter().map(|r| r.mountpoint).collect();
    assert_eq!(recorded, mountpoints);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_mounts_to_same_mountpoint() {
    let svc = TestService::new();
    // Both vaults are named differently, so force the collision service-side.
    svc.service.add_vault("/other/a", "pw3");
    svc.service.set_reuse_mountpoints(true);
    svc.service
        .set_latency(RequestKind::Mount, Duration::from_millis(20));

    let first = {
        let proxy = svc.proxy.clone();
        tokio::spawn(async move {
            proxy
                .mount(Path::new("/vaults/a"), SecretString::from("pw1"))
                .await
        })
    };
    let second = {
        let proxy = svc.proxy.clone();
        tokio::spawn(async move {
            proxy
                .mount(Path::new("/other/a"), SecretString::from("pw3"))
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one mount should win: {results:?}");
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ServiceError::AlreadyMounted(p)) if p == Path::new("/Volumes/a"))));

    let records = svc.proxy.mounts();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].mountpoint, PathBuf::from("/Volumes/a"));
}

#[tokio::test]
async fn test_unmount_before_mount_reply_is_rejected() {
    let svc = TestService::new();
    svc.service
        .set_latency(RequestKind::Mount, Duration::from_millis(200));

    let mount = {
        let svc_proxy = svc.proxy.clone();
        tokio::spawn(async move {
            svc_proxy
                .mount(Path::new(common::VAULT_A), SecretString::from(common::PASSWORD_A))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        svc.proxy.sessions().vault_state(Path::new(common::VAULT_A)),
        SessionState::Mounting
    );
    let err = svc.proxy.unmount(Path::new("/Volumes/a")).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotMounted(_)));
    assert_eq!(svc.service.call_count(RequestKind::Unmount), 0);

    let mountpoint = mount.await.unwrap().unwrap();
    assert_eq!(mountpoint, PathBuf::from("/Volumes/a"));
}

#[tokio::test]
async fn test_concurrent_unmounts_of_same_mountpoint() {
    let svc = TestService::new();
    let mountpoint = svc.mount_a().await.unwrap();
    svc.service
        .set_latency(RequestKind::Unmount, Duration::from_millis(100));

    let first = {
        let proxy = svc.proxy.clone();
        let mountpoint = mountpoint.clone();
        tokio::spawn(async move { proxy.unmount(&mountpoint).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = svc.proxy.unmount(&mountpoint).await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyUnmounting(_)));

    first.await.unwrap().expect("first unmount failed");
    assert!(svc.proxy.mounts().is_empty());
    assert_eq!(svc.service.call_count(RequestKind::Unmount), 1);
}

#[tokio::test]
async fn test_replies_complete_out_of_order() {
    let svc = TestService::new();
    let mountpoint = svc.mount_a().await.unwrap();
    svc.service
        .set_latency(RequestKind::ListMounts, Duration::from_millis(150));

    let slow = {
        let proxy = svc.proxy.clone();
        tokio::spawn(async move { proxy.list_mounts().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Submitted later, answered first.
    let stats = svc.proxy.get_stats(&mountpoint).await.unwrap();
    assert!(!slow.is_finished());
    assert_eq!(stats.bytes_read, 0);

    let mounts = slow.await.unwrap().unwrap();
    assert_eq!(mounts.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_pings() {
    let svc = TestService::new();
    let mut handles = Vec::new();
    for _ in 0..64 {
        let proxy = svc.proxy.clone();
        handles.push(tokio::spawn(async move { proxy.ping().await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(svc.proxy.generation(), 1, "all pings should share one link");
}
