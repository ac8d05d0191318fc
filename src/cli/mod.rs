// ABOUTME: CLI argument parsing and command routing for cache-pool
//
// Provides command-line interface for:
// - Checking that every configured cache server is reachable (check)
// - Showing which server a key maps to (locate)
// - Printing the validated effective configuration (config)

pub mod check;
pub mod config;
pub mod locate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use cache_pool::ClientConfig;

/// Socket pool tooling for memcached-style cache clusters
#[derive(Parser)]
#[command(name = "cache-pool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Connect to every server and report pool health
    Check(CheckArgs),

    /// Show which server a key maps to
    Locate(LocateArgs),

    /// Print the effective configuration
    Config,
}

/// Arguments for the check command
#[derive(clap::Args)]
pub struct CheckArgs {
    /// Skip pre-opening min_pool_size sockets per server
    #[arg(long)]
    pub no_warm_up: bool,
}

/// Arguments for the locate command
#[derive(clap::Args)]
pub struct LocateArgs {
    /// Cache key
    pub key: String,
}

/// Load the config from `path`, or from the default location
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let path = path.map_or_else(ClientConfig::default_path, Path::to_path_buf);
    ClientConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
