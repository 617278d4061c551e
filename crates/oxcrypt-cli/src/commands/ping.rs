//! Ping command - check whether the service answers.

use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use crate::client::Client;
use crate::exit_code;

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Print nothing; report through the exit code only
    #[arg(short, long)]
    pub silent: bool,
}

/// Exits 0 when the service is alive, 1 otherwise.
#[instrument(level = "info", name = "cmd::ping", skip_all)]
pub fn execute(args: &Args, client: &Client) -> Result<u8> {
    let alive = client.run(|proxy| proxy.ping());

    if !args.silent {
        if alive {
            println!("Service is running");
        } else {
            println!("Service is not responding");
        }
    }

    Ok(if alive {
        exit_code::SUCCESS
    } else {
        exit_code::GENERAL_ERROR
    })
}
