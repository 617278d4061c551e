//! Mounts command - list vaults the service has mounted.

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use comfy_table::{Cell, Color, Table};
use oxcrypt_service::MountRecord;
use tracing::instrument;

use crate::client::Client;
use crate::output::{format_bytes, format_relative_time};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[instrument(level = "info", name = "cmd::mounts", skip_all)]
pub fn execute(args: &Args, client: &Client) -> Result<()> {
    let mounts = client
        .run(|proxy| proxy.list_mounts())
        .context("Failed to list mounts")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&mounts)?);
        return Ok(());
    }

    if mounts.is_empty() {
        eprintln!("No active mounts.");
        eprintln!("Use 'oxcrypt mount <vault>' to mount one.");
        return Ok(());
    }

    output_table(&mounts);
    eprintln!();
    eprintln!("{} active mount(s)", mounts.len());
    Ok(())
}

fn output_table(mounts: &[MountRecord]) {
    let mut table = Table::new();
    table.set_header(vec!["Vault", "Mountpoint", "Mounted", "Read", "Written", "Open"]);

    for record in mounts {
        let vault_display = record
            .vault_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_else(|| record.vault_path.to_str().unwrap_or("?"));

        let open = record.stats.open_handles;
        let open_cell = Cell::new(open.to_string()).fg(if open > 0 { Color::Yellow } else { Color::White });

        table.add_row(vec![
            Cell::new(vault_display),
            Cell::new(record.mountpoint.display().to_string()),
            Cell::new(format_relative_time(record.mounted_at)),
            Cell::new(format_bytes(record.stats.bytes_read)),
            Cell::new(format_bytes(record.stats.bytes_written)),
            open_cell,
        ]);
    }

    println!("{table}");
}
