// ABOUTME: Library crate for cache-pool: per-server socket pools with dead-node quarantine
// ABOUTME: Exposes configuration, node pools, the registry and transport seams for clients and tests

#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod failure_policy;
pub mod health;
pub mod locator;
pub mod metrics;
pub mod node;
pub mod registry;
pub mod socket;
pub mod transport;

pub use config::{ClientConfig, NodeEndpoint, PoolSettings, SocketPoolConfig};
pub use error::{ConfigError, PoolError, PoolResult, TimeoutKind};
pub use failure_policy::{FailurePolicy, FailureState};
pub use health::{HealthStatus, NodeHealth, NodeSnapshot, PoolEvent};
pub use locator::{ConsistentHashLocator, NodeLocator, SingleNodeLocator};
pub use metrics::{MetricsSnapshot, NodeMetrics};
pub use node::NodePool;
pub use registry::PoolRegistry;
pub use socket::{PooledSocket, SocketLease, SocketState};
pub use transport::{Connector, TcpConnector};
