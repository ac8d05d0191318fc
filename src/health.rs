// ABOUTME: Node health states, snapshots, pool events and the registry-wide health aggregate
// ABOUTME: Pure data types shared by node pools, the registry and the CLI status output

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NodeEndpoint;
use crate::metrics::MetricsSnapshot;

// === Node Health ===

/// Health of a single node pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    /// Accepting acquisitions
    Alive,
    /// Quarantined: acquisitions fail fast until a revival probe succeeds
    Dead,
}

impl std::fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alive => write!(f, "alive"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

// === Node Snapshot ===

/// Point-in-time view of one node pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub endpoint: NodeEndpoint,
    pub health: NodeHealth,
    /// Sockets parked in the idle set
    pub idle: usize,
    /// Sockets currently leased to callers
    pub in_use: usize,
    /// Connections being established for callers or warm-up
    pub connecting: usize,
    /// Failures since the last success
    pub failure_count: u32,
    /// When the node was last marked dead, if it is dead now
    pub dead_since: Option<DateTime<Utc>>,
    pub metrics: MetricsSnapshot,
}

impl NodeSnapshot {
    /// Idle plus in-use plus connecting sockets
    pub const fn total(&self) -> usize {
        self.idle + self.in_use + self.connecting
    }
}

// === Pool Events ===

/// Notable transitions broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEvent {
    /// Failure policy marked the node dead
    NodeDead { endpoint: NodeEndpoint },
    /// Revival probe succeeded
    NodeRevived { endpoint: NodeEndpoint },
    /// A caller gave up waiting for a socket
    PoolExhausted {
        endpoint: NodeEndpoint,
        #[serde(with = "crate::config::duration_millis")]
        waited: Duration,
    },
}

// === Health Status ===

/// Overall health across every node in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every node is alive
    Healthy,

    /// Some nodes are dead, others still serve
    Degraded {
        /// Dead nodes
        dead: Vec<NodeEndpoint>,
    },

    /// No node is alive
    Critical {
        /// Dead nodes (all of them)
        dead: Vec<NodeEndpoint>,
    },
}

impl HealthStatus {
    /// Fold per-node snapshots into one status
    pub fn from_snapshots(snapshots: &[NodeSnapshot]) -> Self {
        let dead: Vec<NodeEndpoint> = snapshots
            .iter()
            .filter(|s| s.health == NodeHealth::Dead)
            .map(|s| s.endpoint.clone())
            .collect();

        if dead.is_empty() {
            Self::Healthy
        } else if dead.len() == snapshots.len() {
            Self::Critical { dead }
        } else {
            Self::Degraded { dead }
        }
    }

    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::Critical { .. })
    }

    /// Dead nodes, empty when healthy
    #[must_use]
    pub fn dead_nodes(&self) -> &[NodeEndpoint] {
        match self {
            Self::Healthy => &[],
            Self::Degraded { dead } | Self::Critical { dead } => dead,
        }
    }
}
