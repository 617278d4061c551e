//! C entry points for native hosts.
//!
//! A host creates an [`OxVaultClient`] once, then issues operations that
//! complete asynchronously through C callbacks. Each callback fires exactly
//! once, on a worker thread owned by the client. Strings passed to a
//! callback are only valid for the duration of the call.
//!
//! Freeing a client settles everything still in flight: each pending
//! callback fires with `OXVAULT_CHANNEL_LOST` (or `alive = false`) before
//! [`oxvault_client_free`] returns, and none fires afterwards.
//!
//! The matching declarations live in `include/oxvault.h`.

use std::ffi::{CStr, CString, c_char, c_void};
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

use secrecy::SecretString;

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::proxy::ServiceProxy;

/// Callback for mount results. `mountpoint` is null on failure.
pub type MountCallback = unsafe extern "C" fn(
    mountpoint: *const c_char,
    error_code: i64,
    error_msg: *const c_char,
    context: *mut c_void,
);

/// Callback for unmount results. `error_code` is zero on success.
pub type UnmountCallback =
    unsafe extern "C" fn(error_code: i64, error_msg: *const c_char, context: *mut c_void);

/// Callback for ping results.
pub type PingCallback = unsafe extern "C" fn(alive: bool, context: *mut c_void);

/// Opaque client handle owned by the host.
pub struct OxVaultClient {
    runtime: tokio::runtime::Runtime,
    proxy: Arc<ServiceProxy>,
}

impl OxVaultClient {
    /// Wrap `proxy` with a private runtime for callback-driven use.
    pub fn new(proxy: ServiceProxy) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("oxvault-client")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            proxy: Arc::new(proxy),
        })
    }

    /// The proxy driving this client.
    pub fn proxy(&self) -> &Arc<ServiceProxy> {
        &self.proxy
    }
}

/// Host-supplied context pointer, passed back untouched.
struct Context(*mut c_void);

// SAFETY: the pointer is never dereferenced here; the host owns it and
// promises it may be used from the callback thread.
unsafe impl Send for Context {}

impl Context {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

const CLIENT_FREED: &str = "client freed";

/// A callback owed to the host. Delivered exactly once: with the
/// operation's result, or with the cancellation value if the operation is
/// dropped first (runtime shutdown in [`oxvault_client_free`]).
struct Delivery<T> {
    deliver: Option<Box<dyn FnOnce(T) + Send>>,
    cancelled: fn() -> T,
}

impl<T> Delivery<T> {
    fn new(deliver: impl FnOnce(T) + Send + 'static, cancelled: fn() -> T) -> Self {
        Self {
            deliver: Some(Box::new(deliver)),
            cancelled,
        }
    }

    fn complete(mut self, value: T) {
        if let Some(deliver) = self.deliver.take() {
            deliver(value);
        }
    }
}

impl<T> Drop for Delivery<T> {
    fn drop(&mut self) {
        if let Some(deliver) = self.deliver.take() {
            deliver((self.cancelled)());
        }
    }
}

fn freed<T>() -> Result<T, ServiceError> {
    Err(ServiceError::ChannelLost(CLIENT_FREED.to_string()))
}

/// Borrow a C string argument as UTF-8.
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn message(error: &ServiceError) -> CString {
    CString::new(error.to_string().replace('\0', " ")).unwrap_or_default()
}

fn fire_mount_error(callback: MountCallback, error: &ServiceError, context: *mut c_void) {
    let msg = message(error);
    // SAFETY: callback and context are supplied together by the host.
    unsafe { callback(ptr::null(), error.code(), msg.as_ptr(), context) };
}

fn fire_mount_result(
    callback: MountCallback,
    result: Result<PathBuf, ServiceError>,
    context: *mut c_void,
) {
    match result {
        Ok(mountpoint) => {
            let Ok(mountpoint) = CString::new(mountpoint.to_string_lossy().into_owned()) else {
                let error = ServiceError::Protocol("mountpoint contains NUL".to_string());
                fire_mount_error(callback, &error, context);
                return;
            };
            // SAFETY: callback and context are supplied together by the host.
            unsafe { callback(mountpoint.as_ptr(), 0, ptr::null(), context) };
        }
        Err(error) => fire_mount_error(callback, &error, context),
    }
}

fn fire_unmount_result(
    callback: UnmountCallback,
    result: Result<(), ServiceError>,
    context: *mut c_void,
) {
    match result {
        // SAFETY: callback and context are supplied together by the host.
        Ok(()) => unsafe { callback(0, ptr::null(), context) },
        Err(error) => {
            let msg = message(&error);
            // SAFETY: as above.
            unsafe { callback(error.code(), msg.as_ptr(), context) };
        }
    }
}

/// Create a client for the service at `socket_path`.
///
/// Pass null to use the configured socket. Returns null on failure.
///
/// # Safety
/// `socket_path` must be null or a valid NUL-terminated string.
#[cfg(unix)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxvault_client_connect(socket_path: *const c_char) -> *mut OxVaultClient {
    let mut config = match ClientConfig::load(None) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable config");
            ClientConfig::default()
        }
    };
    if !socket_path.is_null() {
        // SAFETY: non-null and NUL-terminated per the contract above.
        let Some(path) = (unsafe { str_arg(socket_path) }) else {
            return ptr::null_mut();
        };
        config.socket_path = PathBuf::from(path);
    }

    match OxVaultClient::new(ServiceProxy::unix(config)) {
        Ok(client) => Box::into_raw(Box::new(client)),
        Err(e) => {
            tracing::error!(error = %e, "failed to start client runtime");
            ptr::null_mut()
        }
    }
}

/// Destroy a client.
///
/// Blocks until every operation still in flight has delivered its callback
/// with `OXVAULT_CHANNEL_LOST` (ping: `alive = false`). No callback fires
/// after this returns.
///
/// # Safety
/// `client` must be null or a pointer from [`oxvault_client_connect`] not
/// yet freed. Must not be called from inside a callback or from a thread
/// running an async runtime.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxvault_client_free(client: *mut OxVaultClient) {
    if client.is_null() {
        return;
    }
    // SAFETY: ownership returns to Rust exactly once per the contract above.
    let OxVaultClient { runtime, proxy } = *unsafe { Box::from_raw(client) };
    proxy.disconnect();
    // Dropping the runtime waits for its workers to stop. Tasks are dropped
    // on the way out, and each unfinished `Delivery` fires as it goes.
    drop(runtime);
    tracing::debug!("vault client freed");
}

/// Mount a vault.
///
/// # Safety
/// `client` must be a live client. `vault_path` and `password` must be
/// null or valid NUL-terminated strings. `context` is passed to `callback`
/// untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxvault_mount(
    client: *const OxVaultClient,
    vault_path: *const c_char,
    password: *const c_char,
    callback: MountCallback,
    context: *mut c_void,
) {
    // SAFETY: live client per the contract above.
    let Some(client) = (unsafe { client.as_ref() }) else {
        fire_mount_error(
            callback,
            &ServiceError::ServiceUnavailable("null client".to_string()),
            context,
        );
        return;
    };
    // SAFETY: valid strings per the contract above.
    let Some(vault_path) = (unsafe { str_arg(vault_path) }).map(PathBuf::from) else {
        fire_mount_error(callback, &ServiceError::InvalidPath(PathBuf::new()), context);
        return;
    };
    // SAFETY: as above.
    let Some(password) = (unsafe { str_arg(password) }).map(|p| SecretString::from(p.to_owned()))
    else {
        fire_mount_error(callback, &ServiceError::InvalidPassword, context);
        return;
    };

    let proxy = Arc::clone(&client.proxy);
    let context = Context(context);
    let delivery = Delivery::new(
        move |result: Result<PathBuf, ServiceError>| {
            fire_mount_result(callback, result, context.get());
        },
        freed,
    );
    client.runtime.spawn(async move {
        delivery.complete(proxy.mount(&vault_path, password).await);
    });
}

/// Unmount the vault at `mountpoint`.
///
/// # Safety
/// `client` must be a live client. `mountpoint` must be null or a valid
/// NUL-terminated string. `context` is passed to `callback` untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxvault_unmount(
    client: *const OxVaultClient,
    mountpoint: *const c_char,
    callback: UnmountCallback,
    context: *mut c_void,
) {
    // SAFETY: live client per the contract above.
    let Some(client) = (unsafe { client.as_ref() }) else {
        let error = ServiceError::ServiceUnavailable("null client".to_string());
        fire_unmount_result(callback, Err(error), context);
        return;
    };
    // SAFETY: valid string per the contract above.
    let Some(mountpoint) = (unsafe { str_arg(mountpoint) }).map(PathBuf::from) else {
        fire_unmount_result(callback, Err(ServiceError::InvalidPath(PathBuf::new())), context);
        return;
    };

    let proxy = Arc::clone(&client.proxy);
    let context = Context(context);
    let delivery = Delivery::new(
        move |result: Result<(), ServiceError>| {
            fire_unmount_result(callback, result, context.get());
        },
        freed,
    );
    client.runtime.spawn(async move {
        delivery.complete(proxy.unmount(&mountpoint).await);
    });
}

/// Check whether the service answers.
///
/// # Safety
/// `client` must be a live client. `context` is passed to `callback` untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn oxvault_ping(
    client: *const OxVaultClient,
    callback: PingCallback,
    context: *mut c_void,
) {
    // SAFETY: live client per the contract above.
    let Some(client) = (unsafe { client.as_ref() }) else {
        // SAFETY: callback and context are supplied together by the host.
        unsafe { callback(false, context) };
        return;
    };

    let proxy = Arc::clone(&client.proxy);
    let context = Context(context);
    let delivery = Delivery::new(
        // SAFETY: as above.
        move |alive: bool| unsafe { callback(alive, context.get()) },
        || false,
    );
    client.runtime.spawn(async move {
        delivery.complete(proxy.ping().await);
    });
}
