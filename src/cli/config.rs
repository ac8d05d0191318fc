// ABOUTME: CLI config command: prints the validated effective configuration
//
// Defaults are filled in, so the output shows every tunable the pools will use.

use anyhow::{Context, Result};

use cache_pool::ClientConfig;

use super::OutputFormat;

/// Execute the config command
pub fn execute(config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to serialize config")?
        }
        OutputFormat::Text => config.to_toml_string().context("Failed to render config")?,
    };
    println!("{rendered}");
    Ok(())
}
