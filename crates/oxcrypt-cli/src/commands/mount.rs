//! Mount command - ask the service to mount a vault.
//!
//! The service picks the mountpoint; it is printed on success.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use secrecy::SecretString;
use tracing::instrument;

use crate::client::Client;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Path to the vault directory
    pub vault: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::mount", skip_all, fields(vault = %args.vault.display()))]
pub fn execute(args: &Args, password: SecretString, client: &Client) -> Result<()> {
    let vault = absolute_vault_path(&args.vault)?;

    let mountpoint = client
        .run(|proxy| proxy.mount(&vault, password))
        .with_context(|| format!("Failed to mount {}", vault.display()))?;

    if args.json {
        let output = serde_json::json!({
            "vault_path": vault,
            "mountpoint": mountpoint,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        eprintln!("Mounted {}", vault.display());
        println!("{}", mountpoint.display());
    }

    Ok(())
}

/// Relative paths are taken from the current directory; the service only
/// accepts absolute ones.
fn absolute_vault_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::path::absolute(path)
        .with_context(|| format!("Failed to resolve vault path: {}", path.display()))
}
