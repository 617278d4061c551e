#![deny(unsafe_code)]

// Use mimalloc for reduced allocation latency (enabled by default).
// Disable with `--no-default-features` if debugging allocator issues.
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod auth;
mod client;
mod commands;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use oxcrypt_service::{ConfigError, ServiceError};
use tracing_subscriber::EnvFilter;

use crate::auth::PasswordOptions;
use crate::client::Client;
use crate::commands::{completions, mount, mounts, ping, stats, unmount};

/// Command-line client for the OxCrypt vault mount service
#[derive(Parser)]
#[command(name = "oxcrypt")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Mount a vault (pipe password from secret manager)
    echo \"$SECRET\" | oxcrypt --password-stdin mount ~/vault

    # List active mounts
    oxcrypt mounts

    # Watch statistics for one mount
    oxcrypt stats /Volumes/vault --watch

    # Unmount
    oxcrypt unmount /Volumes/vault
")]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Client configuration file (default: <config dir>/oxcrypt/service.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Service socket path (overrides config and OXCRYPT_SERVICE_SOCKET)
    #[arg(long, value_name = "PATH", global = true)]
    socket: Option<PathBuf>,

    /// Vault passphrase (insecure, prefer --password-stdin or OXCRYPT_PASSWORD)
    #[arg(long, env = "OXCRYPT_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Read password from stdin (single line)
    #[arg(long, conflicts_with = "password", global = true)]
    password_stdin: bool,

    /// Read password from file descriptor
    #[arg(long, value_name = "FD", conflicts_with_all = ["password", "password_stdin"], global = true)]
    password_fd: Option<i32>,

    #[command(subcommand)]
    command: Commands,
}

impl From<&Cli> for PasswordOptions {
    fn from(cli: &Cli) -> Self {
        Self {
            password: cli.password.clone(),
            password_stdin: cli.password_stdin,
            password_fd: cli.password_fd,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the service to mount a vault
    Mount(mount::Args),

    /// Unmount a mounted vault
    Unmount(unmount::Args),

    /// List active mounts
    Mounts(mounts::Args),

    /// Show statistics for mounted vaults
    Stats(stats::StatsArgs),

    /// Check whether the service is reachable
    Ping(ping::Args),

    /// Generate shell completions
    Completions(completions::Args),
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let code = categorize_error(&e);

            // Only print error if not quiet mode (quiet is parsed separately for this)
            let args: Vec<String> = std::env::args().collect();
            let is_quiet = args.iter().any(|a| a == "-q" || a == "--quiet");

            if !is_quiet {
                eprintln!("Error: {e:#}");
            }

            ExitCode::from(code)
        }
    }
}

fn run() -> Result<u8> {
    let cli = Cli::parse();

    if !cli.quiet {
        setup_tracing(cli.verbose);
    }

    let password_opts = PasswordOptions::from(&cli);
    let client = || Client::new(cli.config.as_deref(), cli.socket.as_deref());

    match &cli.command {
        Commands::Mount(args) => {
            let client = client()?;
            let password = auth::get_passphrase(&password_opts)?;
            mount::execute(args, password, &client)?;
        }
        Commands::Unmount(args) => unmount::execute(args, &client()?)?,
        Commands::Mounts(args) => mounts::execute(args, &client()?)?,
        Commands::Stats(args) => stats::run(args, &client()?)?,
        Commands::Ping(args) => return ping::execute(args, &client()?),
        Commands::Completions(args) => completions::execute(args),
    }

    Ok(exit_code::SUCCESS)
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(service_err) = cause.downcast_ref::<ServiceError>() {
            return match service_err {
                ServiceError::AuthFailure | ServiceError::InvalidPassword => exit_code::AUTH_FAILED,
                ServiceError::NotMounted(_) => exit_code::NOT_FOUND,
                ServiceError::InvalidPath(_) => exit_code::VAULT_INVALID,
                ServiceError::PermissionDenied => exit_code::PERMISSION_DENIED,
                ServiceError::AlreadyMounted(_)
                | ServiceError::AlreadyUnmounting(_)
                | ServiceError::DuplicateMount(_) => exit_code::CONFLICT,
                ServiceError::MountFailed(_) | ServiceError::UnmountFailed(_) => {
                    exit_code::MOUNT_FAILED
                }
                ServiceError::ServiceUnavailable(_)
                | ServiceError::ChannelLost(_)
                | ServiceError::RateLimited => exit_code::SERVICE_UNAVAILABLE,
                ServiceError::Timeout { .. } => exit_code::TIMEOUT,
                ServiceError::Remote(_) | ServiceError::Protocol(_) => exit_code::GENERAL_ERROR,
            };
        }

        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::CONFIG_ERROR;
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::PermissionDenied => return exit_code::PERMISSION_DENIED,
                io::ErrorKind::NotFound => return exit_code::NOT_FOUND,
                io::ErrorKind::Interrupted => return exit_code::CANCELLED,
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}
