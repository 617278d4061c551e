//! Stats command for displaying mount statistics.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL_CONDENSED};
use oxcrypt_service::{MountStats, ServiceError, ServiceProxy};
use tracing::instrument;

use crate::client::Client;
use crate::output::{format_bytes, format_relative_time};

#[derive(Args, Clone)]
pub struct StatsArgs {
    /// Mountpoint to show stats for (shows all if not specified)
    pub mountpoint: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Watch mode - continuously update stats
    #[arg(short, long)]
    pub watch: bool,

    /// Refresh interval in seconds for watch mode
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

struct MountReport {
    vault_path: PathBuf,
    mountpoint: PathBuf,
    stats: Result<MountStats, ServiceError>,
}

#[instrument(level = "info", name = "cmd::stats", skip_all)]
pub fn run(args: &StatsArgs, client: &Client) -> Result<()> {
    if args.watch {
        run_watch_mode(client, args)
    } else {
        run_once(client, args)
    }
}

fn run_once(client: &Client, args: &StatsArgs) -> Result<()> {
    let reports = client.run(|proxy| collect(proxy, args.mountpoint.as_deref()))?;

    if reports.is_empty() {
        println!("No active mounts");
        return Ok(());
    }

    match args.format {
        OutputFormat::Json => {
            let json_results: Vec<_> = reports
                .iter()
                .map(|report| match &report.stats {
                    Ok(stats) => serde_json::json!({
                        "vault_path": report.vault_path,
                        "mountpoint": report.mountpoint,
                        "stats": stats,
                    }),
                    Err(e) => serde_json::json!({
                        "vault_path": report.vault_path,
                        "mountpoint": report.mountpoint,
                        "error": e.to_string(),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json_results)?);
        }
        OutputFormat::Table => {
            for report in &reports {
                println!("Vault: {} @ {}", report.vault_path.display(), report.mountpoint.display());
                match &report.stats {
                    Ok(stats) => print_stats_table(stats),
                    Err(e) => println!("  Stats unavailable: {e}"),
                }
                println!();
            }
        }
    }

    Ok(())
}

/// Refresh the mount table, then fetch stats for the selected mounts.
///
/// A single requested mountpoint fails the command; with no selection a
/// failing mount is reported alongside the others.
async fn collect(proxy: &ServiceProxy, only: Option<&Path>) -> Result<Vec<MountReport>> {
    let mounts = proxy.list_mounts().await.context("Failed to list mounts")?;

    if let Some(mountpoint) = only {
        let stats = proxy
            .get_stats(mountpoint)
            .await
            .with_context(|| format!("Failed to get stats for {}", mountpoint.display()))?;
        let vault_path = mounts
            .into_iter()
            .find(|record| record.mountpoint == mountpoint)
            .map(|record| record.vault_path)
            .unwrap_or_default();
        return Ok(vec![MountReport {
            vault_path,
            mountpoint: mountpoint.to_path_buf(),
            stats: Ok(stats),
        }]);
    }

    let mut reports = Vec::with_capacity(mounts.len());
    for record in mounts {
        let stats = proxy.get_stats(&record.mountpoint).await;
        if let Err(e) = &stats {
            tracing::debug!(mountpoint = %record.mountpoint.display(), error = %e, "stats unavailable");
        }
        reports.push(MountReport {
            vault_path: record.vault_path,
            mountpoint: record.mountpoint,
            stats,
        });
    }
    Ok(reports)
}

fn run_watch_mode(client: &Client, args: &StatsArgs) -> Result<()> {
    println!("Watching stats (Ctrl+C to stop)...\n");

    loop {
        // Clear screen (simple approach)
        print!("\x1B[2J\x1B[1;1H");

        run_once(client, args)?;

        std::thread::sleep(Duration::from_secs(args.interval));
    }
}

fn print_stats_table(stats: &MountStats) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Bytes read".to_string(), format_bytes(stats.bytes_read)]);
    table.add_row(vec!["Bytes written".to_string(), format_bytes(stats.bytes_written)]);
    table.add_row(vec!["Operations".to_string(), stats.ops_count.to_string()]);
    table.add_row(vec!["Files opened".to_string(), stats.files_opened.to_string()]);
    table.add_row(vec!["Open handles".to_string(), stats.open_handles.to_string()]);
    println!("{table}");

    if let Some(last_access) = stats.last_access {
        println!("  Last access: {}", format_relative_time(last_access));
    }
    for (key, value) in &stats.extra {
        println!("  {key}: {value}");
    }
}
