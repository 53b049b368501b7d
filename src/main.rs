mod api;
mod args;
mod commands;
mod modem;
mod reading;
mod schedule;
mod shared;
mod store;
mod sync;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{AppCommand, Cli};
use commands::{run_aggregate, run_dial, run_read, run_service};

// Top-level entrypoint: set up logging, parse CLI args and dispatch to a command module.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        AppCommand::Run(args) => run_service(args),
        AppCommand::Aggregate(args) => run_aggregate(args),
        AppCommand::Read(args) => run_read(args),
        AppCommand::Dial(args) => run_dial(args),
    }
}
