// ABOUTME: CLI locate command: shows which cache server a key maps to
//
// Uses the same locator the registry would build for the configured server
// list. Opens no connections.

use anyhow::{Context, Result};
use serde::Serialize;

use cache_pool::{ClientConfig, PoolRegistry};

use super::{LocateArgs, OutputFormat};

/// JSON output structure for the locate command
#[derive(Debug, Serialize)]
pub struct LocateOutput<'a> {
    pub key: &'a str,
    pub server: &'a str,
}

/// Execute the locate command
pub fn execute(args: &LocateArgs, config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let registry = PoolRegistry::connect_tcp(config).context("Failed to build pool registry")?;
    let server = registry
        .locate(&args.key)
        .with_context(|| format!("Failed to locate key '{}'", args.key))?;

    match format {
        OutputFormat::Json => {
            let output = LocateOutput {
                key: &args.key,
                server: server.as_str(),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to serialize location")?
            );
        }
        OutputFormat::Text => println!("{server}"),
    }

    Ok(())
}
