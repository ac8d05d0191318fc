// ABOUTME: CLI check command: connects to every configured server and reports pool health
//
// Warms each node pool, borrows and returns one socket per server, then prints
// the per-node snapshot (text table or JSON). Fails when no server is reachable.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use cache_pool::{ClientConfig, HealthStatus, NodeHealth, NodeSnapshot, PoolRegistry};

use super::{CheckArgs, OutputFormat};

/// Check result for one server
#[derive(Debug, Serialize)]
pub struct NodeCheck {
    pub reachable: bool,
    pub error: Option<String>,
    #[serde(flatten)]
    pub snapshot: NodeSnapshot,
}

/// JSON output structure for the check command
#[derive(Debug, Serialize)]
pub struct CheckOutput {
    pub status: HealthStatus,
    pub nodes: Vec<NodeCheck>,
}

/// Execute the check command
pub async fn execute(args: CheckArgs, config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let registry = PoolRegistry::connect_tcp(config).context("Failed to build pool registry")?;

    if !args.no_warm_up {
        registry.start().await;
    }

    let mut results = Vec::with_capacity(registry.servers().len());
    for endpoint in registry.servers() {
        let outcome = match registry.acquire_node(endpoint).await {
            Ok(lease) => {
                registry.release(lease, true).await;
                None
            }
            Err(e) => Some(e.to_string()),
        };
        results.push(outcome);
    }

    let nodes: Vec<NodeCheck> = registry
        .health_snapshot()
        .into_iter()
        .zip(results)
        .map(|(snapshot, error)| NodeCheck {
            reachable: error.is_none(),
            error,
            snapshot,
        })
        .collect();
    let status = registry.status();
    let unreachable = nodes.iter().filter(|n| !n.reachable).count();

    registry.shutdown().await;

    match format {
        OutputFormat::Json => {
            let total = nodes.len();
            let output = CheckOutput { status, nodes };
            println!(
                "{}",
                serde_json::to_string_pretty(&output).context("Failed to serialize check result")?
            );
            if unreachable == total {
                bail!("No cache server is reachable");
            }
        }
        OutputFormat::Text => {
            println!("{:<28} {:<8} {:>5} {:>7} {:>9}", "SERVER", "HEALTH", "IDLE", "IN USE", "FAILURES");
            println!("{}", "━".repeat(61));
            for node in &nodes {
                let dot = match (node.reachable, node.snapshot.health) {
                    (true, NodeHealth::Alive) => "\x1b[32m●\x1b[0m",
                    (false, NodeHealth::Alive) => "\x1b[33m●\x1b[0m",
                    (_, NodeHealth::Dead) => "\x1b[31m●\x1b[0m",
                };
                println!(
                    "{dot} {:<26} {:<8} {:>5} {:>7} {:>9}",
                    node.snapshot.endpoint.as_str(),
                    node.snapshot.health.to_string(),
                    node.snapshot.idle,
                    node.snapshot.in_use,
                    node.snapshot.failure_count,
                );
                if let Some(error) = &node.error {
                    println!("  └─ {error}");
                }
            }
            println!();

            if unreachable == nodes.len() || status.is_critical() {
                bail!("No cache server is reachable");
            }
            match &status {
                HealthStatus::Healthy if unreachable == 0 => {
                    println!("All {} servers healthy", nodes.len());
                }
                _ => println!(
                    "Degraded: {} of {} servers unreachable, {} dead",
                    unreachable,
                    nodes.len(),
                    status.dead_nodes().len()
                ),
            }
        }
    }

    Ok(())
}
