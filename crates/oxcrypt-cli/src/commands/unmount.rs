//! Unmount command - ask the service to unmount a vault.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::client::Client;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Directory where the vault is mounted
    pub mountpoint: PathBuf,
}

#[instrument(level = "info", name = "cmd::unmount", skip_all, fields(mountpoint = %args.mountpoint.display()))]
pub fn execute(args: &Args, client: &Client) -> Result<()> {
    let mountpoint = &args.mountpoint;

    client
        .run(|proxy| async move {
            // A fresh client knows no mounts until it has asked the service.
            proxy.list_mounts().await?;
            proxy.unmount(mountpoint).await
        })
        .with_context(|| format!("Failed to unmount {}", mountpoint.display()))?;

    eprintln!("Unmounted {}", mountpoint.display());
    Ok(())
}
