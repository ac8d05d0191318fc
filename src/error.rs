// ABOUTME: Error taxonomy for the socket pool: configuration and runtime failures
//
// ConfigError is raised while building configuration (never at use time).
// PoolError covers everything acquire/release and the socket wrapper can hit:
// connect failures, timeouts, exhaustion, dead nodes and transport I/O.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::NodeEndpoint;

// === Configuration Errors ===

/// Invalid configuration values, rejected when the configuration is built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Minimum pool size is larger than the maximum
    #[error("min_pool_size ({min}) must not exceed max_pool_size ({max})")]
    MinExceedsMax { min: usize, max: usize },

    /// A pool that can never hold a socket
    #[error("max_pool_size must be at least 1")]
    ZeroMaxPoolSize,

    /// A duration that must be non-zero was zero
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// Failure policy threshold of zero would mark every node dead up front
    #[error("failure policy threshold must be at least 1")]
    ZeroFailureThreshold,

    /// Server address could not be parsed as `host:port`
    #[error("invalid server address '{0}': expected host:port")]
    InvalidEndpoint(String),

    /// No servers configured
    #[error("no servers configured")]
    NoServers,

    /// Same server listed twice
    #[error("server '{0}' is configured more than once")]
    DuplicateServer(String),

    /// Config file could not be read or parsed
    #[error("failed to load configuration: {0}")]
    Load(String),
}

// === Runtime Errors ===

/// Operation that ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Establishing the transport connection
    Connect,
    /// Writing to the socket
    Send,
    /// Reading from the socket
    Receive,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Errors returned by node pools, the registry and pooled sockets
#[derive(Debug, Error)]
pub enum PoolError {
    /// Transport could not be established
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: NodeEndpoint,
        #[source]
        source: io::Error,
    },

    /// Connect, send or receive exceeded its timeout
    #[error("{kind} to {endpoint} timed out after {after:?}")]
    Timeout {
        endpoint: NodeEndpoint,
        kind: TimeoutKind,
        after: Duration,
    },

    /// Queue timeout elapsed while waiting for a free socket
    #[error("Socket pool for {endpoint} exhausted after waiting {waited:?}")]
    PoolExhausted { endpoint: NodeEndpoint, waited: Duration },

    /// Node is quarantined; acquisitions fail fast until a revival probe succeeds
    #[error("Node {endpoint} is dead")]
    NodeDead { endpoint: NodeEndpoint },

    /// I/O failure while using a borrowed socket
    #[error("Transport error on {endpoint}: {source}")]
    Transport {
        endpoint: NodeEndpoint,
        #[source]
        source: io::Error,
    },

    /// Pool has been drained or the registry shut down
    #[error("Socket pool for {endpoint} is shut down")]
    ShutDown { endpoint: NodeEndpoint },

    /// Endpoint is not part of the registry
    #[error("Unknown node: {0}")]
    UnknownNode(NodeEndpoint),

    /// Locator has no node to map the key to
    #[error("No servers available to handle key")]
    NoServers,
}

impl PoolError {
    /// The endpoint this error concerns, if any
    pub const fn endpoint(&self) -> Option<&NodeEndpoint> {
        match self {
            Self::Connect { endpoint, .. }
            | Self::Timeout { endpoint, .. }
            | Self::PoolExhausted { endpoint, .. }
            | Self::NodeDead { endpoint }
            | Self::Transport { endpoint, .. }
            | Self::ShutDown { endpoint }
            | Self::UnknownNode(endpoint) => Some(endpoint),
            Self::NoServers => None,
        }
    }

    /// Whether this error says something about the remote node's health.
    ///
    /// Exhaustion, dead-node and shutdown errors are local pool conditions and
    /// never count against a node.
    pub const fn is_node_failure(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Timeout { .. } | Self::Transport { .. }
        )
    }
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;
