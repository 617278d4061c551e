#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_cmd::Command;
use oxcrypt_service::testing::FakeVaultService;
use oxcrypt_service::{bind_unix, serve_unix};
use predicates::prelude::*;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const TEST_VAULT: &str = "/vaults/work";
const TEST_PASSWORD: &str = "test-password-123";

/// Exit codes, mirrored from the binary.
const GENERAL_ERROR: i32 = 1;
const AUTH_FAILED: i32 = 3;
const NOT_FOUND: i32 = 4;
const VAULT_INVALID: i32 = 5;
const SERVICE_UNAVAILABLE: i32 = 8;

/// A fake service on a Unix socket in a temp dir, served from a background runtime.
struct TestServer {
    dir: TempDir,
    socket: PathBuf,
    service: Arc<FakeVaultService>,
    _runtime: Runtime,
}

impl TestServer {
    fn start() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let socket = dir.path().join("service.sock");
        let service = Arc::new(FakeVaultService::new().with_vault(TEST_VAULT, TEST_PASSWORD));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to build runtime");
        let listener = {
            let _guard = runtime.enter();
            bind_unix(&socket).expect("Failed to bind socket")
        };
        runtime.spawn(serve_unix(listener, service.clone()));

        Self {
            dir,
            socket,
            service,
            _runtime: runtime,
        }
    }

    fn oxcrypt(&self) -> Command {
        oxcrypt_at(self.dir.path(), &self.socket)
    }
}

/// The binary pointed at `socket`, with a config path that does not exist.
fn oxcrypt_at(dir: &Path, socket: &Path) -> Command {
    let mut cmd = Command::cargo_bin("oxcrypt").unwrap();
    cmd.arg("--config")
        .arg(dir.join("missing.toml"))
        .arg("--socket")
        .arg(socket)
        .env_remove("OXCRYPT_PASSWORD")
        .env_remove("OXCRYPT_SERVICE_SOCKET");
    cmd
}

fn oxcrypt_without_service() -> (TempDir, Command) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let cmd = oxcrypt_at(dir.path(), &dir.path().join("nobody.sock"));
    (dir, cmd)
}

// ============================================================================
// Help and completions
// ============================================================================

#[test]
fn test_help() {
    Command::cargo_bin("oxcrypt")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mount"))
        .stdout(predicate::str::contains("unmount"))
        .stdout(predicate::str::contains("ping"));
}

#[test]
fn test_version() {
    Command::cargo_bin("oxcrypt")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("oxcrypt"));
}

#[test]
fn test_completions_bash() {
    Command::cargo_bin("oxcrypt")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("oxcrypt"));
}

#[test]
fn test_password_flags_conflict() {
    let (_dir, mut cmd) = oxcrypt_without_service();
    cmd.args(["--password", "x", "--password-stdin", "mount", TEST_VAULT])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// ============================================================================
// Service unreachable
// ============================================================================

#[test]
fn test_ping_without_service() {
    let (_dir, mut cmd) = oxcrypt_without_service();
    cmd.arg("ping")
        .assert()
        .code(GENERAL_ERROR)
        .stdout(predicate::str::contains("not responding"));
}

#[test]
fn test_mount_without_service() {
    let (_dir, mut cmd) = oxcrypt_without_service();
    cmd.args(["--password", TEST_PASSWORD, "mount", TEST_VAULT])
        .assert()
        .code(SERVICE_UNAVAILABLE)
        .stderr(predicate::str::contains("Failed to mount"));
}

#[test]
fn test_quiet_suppresses_error_message() {
    let (_dir, mut cmd) = oxcrypt_without_service();
    cmd.args(["--quiet", "--password", TEST_PASSWORD, "mount", TEST_VAULT])
        .assert()
        .code(SERVICE_UNAVAILABLE)
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("service.toml");
    std::fs::write(&config, "socket_path = [").unwrap();

    Command::cargo_bin("oxcrypt")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("ping")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("configuration"));
}

// ============================================================================
// Against a running service
// ============================================================================

#[test]
fn test_ping_with_service() {
    let server = TestServer::start();
    server
        .oxcrypt()
        .arg("ping")
        .assert()
        .success()
        .stdout(predicate::str::contains("Service is running"));
}

#[test]
fn test_mount_list_stats_unmount() {
    let server = TestServer::start();

    server
        .oxcrypt()
        .args(["--password", TEST_PASSWORD, "mount", TEST_VAULT])
        .assert()
        .success()
        .stdout(predicate::str::contains("/Volumes/work"));

    let output = server
        .oxcrypt()
        .args(["mounts", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let mounts: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(mounts.as_array().map(Vec::len), Some(1));
    assert_eq!(mounts[0]["mountpoint"], "/Volumes/work");
    assert_eq!(mounts[0]["vaultPath"], TEST_VAULT);

    server.service.record_io(Path::new("/Volumes/work"), 2048, 0);
    server
        .oxcrypt()
        .args(["stats", "/Volumes/work", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2048"));

    server
        .oxcrypt()
        .args(["unmount", "/Volumes/work"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Unmounted"));

    assert!(server.service.mountpoints().is_empty());
}

#[test]
fn test_mount_json_output() {
    let server = TestServer::start();
    let output = server
        .oxcrypt()
        .args(["--password", TEST_PASSWORD, "mount", TEST_VAULT, "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["mountpoint"], "/Volumes/work");
}

#[test]
fn test_password_from_stdin() {
    let server = TestServer::start();
    server
        .oxcrypt()
        .args(["--password-stdin", "mount", TEST_VAULT])
        .write_stdin(format!("{TEST_PASSWORD}\n"))
        .assert()
        .success();
}

#[test]
fn test_wrong_password() {
    let server = TestServer::start();
    server
        .oxcrypt()
        .args(["--password", "wrong", "mount", TEST_VAULT])
        .assert()
        .code(AUTH_FAILED);
    assert!(server.service.mountpoints().is_empty());
}

#[test]
fn test_unknown_vault() {
    let server = TestServer::start();
    server
        .oxcrypt()
        .args(["--password", TEST_PASSWORD, "mount", "/vaults/missing"])
        .assert()
        .code(VAULT_INVALID);
}

#[test]
fn test_unmount_unknown_mountpoint() {
    let server = TestServer::start();
    server
        .oxcrypt()
        .args(["unmount", "/Volumes/nothing"])
        .assert()
        .code(NOT_FOUND);
}

#[test]
fn test_mounts_empty() {
    let server = TestServer::start();
    server
        .oxcrypt()
        .arg("mounts")
        .assert()
        .success()
        .stderr(predicate::str::contains("No active mounts"));
}
