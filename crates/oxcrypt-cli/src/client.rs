//! Blocking wrapper around the async service proxy.

use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};
use oxcrypt_service::{ClientConfig, ServiceProxy};
use tokio::runtime::Runtime;

/// One service connection for the lifetime of a command.
pub struct Client {
    // Dropped before the runtime so the connection closes while it still runs.
    proxy: ServiceProxy,
    runtime: Runtime,
}

impl Client {
    /// Load configuration and prepare a proxy. Does not connect yet.
    pub fn new(config_path: Option<&Path>, socket: Option<&Path>) -> Result<Self> {
        let mut config = ClientConfig::load(config_path).context("Failed to load configuration")?;
        if let Some(socket) = socket {
            config.socket_path = socket.to_path_buf();
        }
        tracing::debug!(socket = %config.socket_path.display(), "using service socket");

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("oxcrypt-cli")
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;

        Ok(Self {
            proxy: Self::proxy(config)?,
            runtime,
        })
    }

    #[cfg(unix)]
    #[allow(clippy::unnecessary_wraps)]
    fn proxy(config: ClientConfig) -> Result<ServiceProxy> {
        Ok(ServiceProxy::unix(config))
    }

    #[cfg(not(unix))]
    fn proxy(_config: ClientConfig) -> Result<ServiceProxy> {
        anyhow::bail!("the vault service is only reachable over Unix sockets");
    }

    /// Run `f` against the proxy to completion.
    pub fn run<'a, F, Fut, T>(&'a self, f: F) -> T
    where
        F: FnOnce(&'a ServiceProxy) -> Fut,
        Fut: Future<Output = T> + 'a,
    {
        self.runtime.block_on(f(&self.proxy))
    }
}
