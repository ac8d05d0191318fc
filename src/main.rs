// ABOUTME: Main entry point for the cache-pool command-line tool
//
// Binary: cache-pool
// Usage: cache-pool [--config PATH] [--format text|json] <COMMAND>
// - check: connect to every configured server and report pool health
// - locate: show which server a key maps to
// - config: print the effective configuration

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

mod cli;

use cli::{Cli, Commands, OutputFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(args.format);

    let config = cli::load_config(args.config.as_deref())?;

    match args.command {
        Commands::Check(check_args) => cli::check::execute(check_args, &config, args.format).await,
        Commands::Locate(locate_args) => cli::locate::execute(&locate_args, &config, args.format),
        Commands::Config => cli::config::execute(&config, args.format),
    }
}

/// Log to stderr so command output on stdout stays machine-readable
fn setup_logging(format: OutputFormat) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cache_pool=info".into());

    match format {
        OutputFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json() // JSON Lines, one event per line
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .with(filter)
            .init(),
        OutputFormat::Text => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init(),
    }
}
