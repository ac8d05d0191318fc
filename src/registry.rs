// ABOUTME: Registry owning one node pool per configured cache server
// ABOUTME: Routes keys to servers, aggregates health and drains every pool on shutdown

//! Pool registry.
//!
//! The registry is built once from a server list and a [`SocketPoolConfig`]
//! and never changes membership afterwards. Keys are mapped to servers by a
//! [`NodeLocator`]; the chosen server's [`NodePool`] does the actual work.
//!
//! # Usage
//!
//! ```ignore
//! let config = ClientConfig::load(&ClientConfig::default_path())?;
//! let registry = PoolRegistry::connect_tcp(&config)?;
//! registry.start().await;
//!
//! let mut socket = registry.acquire("user:42").await?;
//! let ok = socket.send(b"get user:42\r\n").await.is_ok();
//! registry.release(socket, ok).await;
//!
//! registry.shutdown().await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, NodeEndpoint, SocketPoolConfig};
use crate::error::{ConfigError, PoolError, PoolResult};
use crate::health::{HealthStatus, NodeSnapshot, PoolEvent};
use crate::locator::{ConsistentHashLocator, NodeLocator, SingleNodeLocator};
use crate::node::NodePool;
use crate::socket::SocketLease;
use crate::transport::{Connector, TcpConnector};

/// Registry-wide event channel capacity
const EVENT_CAPACITY: usize = 256;

/// One node pool per server plus key routing
pub struct PoolRegistry<C: Connector> {
    config: Arc<SocketPoolConfig>,
    nodes: HashMap<NodeEndpoint, NodePool<C>>,
    /// Servers in configuration order
    order: Vec<NodeEndpoint>,
    locator: Box<dyn NodeLocator>,
    events: broadcast::Sender<PoolEvent>,
    shutdown: AtomicBool,
}

impl<C: Connector> std::fmt::Debug for PoolRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("servers", &self.order)
            .field("shutdown", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl PoolRegistry<TcpConnector> {
    /// Registry over plain TCP using the socket options from `config`
    pub fn connect_tcp(config: &ClientConfig) -> Result<Self, ConfigError> {
        let connector = TcpConnector::from_config(&config.socket_pool);
        Self::from_client_config(config, connector)
    }
}

impl<C: Connector> PoolRegistry<C> {
    /// Build a registry with one empty node pool per server.
    ///
    /// Uses a single-node locator for one server and a consistent hash ring
    /// otherwise. Nothing connects until `start` or the first `acquire`.
    pub fn new(
        config: SocketPoolConfig,
        servers: Vec<NodeEndpoint>,
        connector: C,
    ) -> Result<Self, ConfigError> {
        // Reuse the server list checks
        let client = ClientConfig::new(servers, config)?;
        let ClientConfig {
            servers,
            socket_pool,
        } = client;

        let locator: Box<dyn NodeLocator> = match servers.as_slice() {
            [only] => Box::new(SingleNodeLocator::new(only.clone())),
            many => Box::new(ConsistentHashLocator::new(many)),
        };

        let config = Arc::new(socket_pool);
        let connector = Arc::new(connector);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let nodes = servers
            .iter()
            .map(|endpoint| {
                let pool = NodePool::with_events(
                    endpoint.clone(),
                    Arc::clone(&config),
                    Arc::clone(&connector),
                    events.clone(),
                );
                (endpoint.clone(), pool)
            })
            .collect();

        debug!(servers = servers.len(), "Pool registry created");

        Ok(Self {
            config,
            nodes,
            order: servers,
            locator,
            events,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn from_client_config(config: &ClientConfig, connector: C) -> Result<Self, ConfigError> {
        Self::new(config.socket_pool.clone(), config.servers.clone(), connector)
    }

    /// Replace the key locator
    #[must_use]
    pub fn with_locator(mut self, locator: impl NodeLocator + 'static) -> Self {
        self.locator = Box::new(locator);
        self
    }

    pub fn config(&self) -> &SocketPoolConfig {
        &self.config
    }

    /// Servers in configuration order
    pub fn servers(&self) -> &[NodeEndpoint] {
        &self.order
    }

    pub fn node(&self, endpoint: &NodeEndpoint) -> Option<&NodePool<C>> {
        self.nodes.get(endpoint)
    }

    /// Warm every node up to `min_pool_size`, all nodes concurrently.
    /// Returns the number of sockets opened.
    pub async fn start(&self) -> usize {
        info!(servers = self.order.len(), "Starting pool registry");

        let created: usize = join_all(self.nodes_in_order().map(|node| node.warm_up()))
            .await
            .into_iter()
            .sum();

        info!(sockets = created, "Pool registry started");
        created
    }

    /// Server responsible for `key`
    pub fn locate(&self, key: &str) -> PoolResult<&NodeEndpoint> {
        self.locator.locate(key).ok_or(PoolError::NoServers)
    }

    /// Borrow a socket to whichever server owns `key`
    pub async fn acquire(&self, key: &str) -> PoolResult<SocketLease<C::Stream>> {
        let endpoint = self.locate(key)?;
        self.acquire_node(endpoint).await
    }

    /// Borrow a socket to a specific server
    pub async fn acquire_node(
        &self,
        endpoint: &NodeEndpoint,
    ) -> PoolResult<SocketLease<C::Stream>> {
        let node = self
            .nodes
            .get(endpoint)
            .ok_or_else(|| PoolError::UnknownNode(endpoint.clone()))?;

        if self.is_shut_down() {
            return Err(PoolError::ShutDown {
                endpoint: endpoint.clone(),
            });
        }

        node.acquire().await
    }

    /// Return a socket to the pool it came from
    pub async fn release(&self, lease: SocketLease<C::Stream>, success: bool) {
        match self.nodes.get(lease.endpoint()) {
            Some(node) => node.release(lease, success).await,
            None => {
                warn!(endpoint = %lease.endpoint(), "Released socket for unknown node; closing it");
                drop(lease);
            }
        }
    }

    /// Point-in-time view of every node, in configuration order
    pub fn health_snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes_in_order().map(|node| node.snapshot()).collect()
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_snapshots(&self.health_snapshot())
    }

    /// Events from every node in the registry
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Drain every node pool. Returns the number of idle sockets closed.
    pub async fn release_all(&self) -> usize {
        join_all(self.nodes_in_order().map(|node| node.drain()))
            .await
            .into_iter()
            .sum()
    }

    /// Stop serving and close every pooled socket. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("Pool registry already shut down");
            return;
        }

        info!(servers = self.order.len(), "Shutting down pool registry");
        let closed = self.release_all().await;
        info!(closed, "Pool registry shutdown complete");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn nodes_in_order(&self) -> impl Iterator<Item = &NodePool<C>> {
        self.order.iter().filter_map(|endpoint| self.nodes.get(endpoint))
    }
}

impl<C: Connector> Drop for PoolRegistry<C> {
    fn drop(&mut self) {
        // Revival probes hold only weak references and end on their own.
        // Callers should call shutdown() for a graceful close.
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("Pool registry dropped without shutdown");
        }
    }
}
