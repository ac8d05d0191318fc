// ABOUTME: Key to server mapping for the registry
// ABOUTME: Single-server passthrough and an FNV-1a consistent hash ring

use std::collections::BTreeMap;

use crate::config::NodeEndpoint;

/// Virtual points each server gets on the hash ring
pub const POINTS_PER_NODE: usize = 100;

/// Maps cache keys to servers
pub trait NodeLocator: Send + Sync {
    /// Server responsible for `key`, `None` when there are no servers
    fn locate(&self, key: &str) -> Option<&NodeEndpoint>;
}

/// Every key goes to the one configured server
#[derive(Debug, Clone)]
pub struct SingleNodeLocator {
    node: NodeEndpoint,
}

impl SingleNodeLocator {
    pub const fn new(node: NodeEndpoint) -> Self {
        Self { node }
    }
}

impl NodeLocator for SingleNodeLocator {
    fn locate(&self, _key: &str) -> Option<&NodeEndpoint> {
        Some(&self.node)
    }
}

/// Consistent hash ring; adding or removing a server only remaps the keys
/// that fall next to its points.
#[derive(Debug, Clone, Default)]
pub struct ConsistentHashLocator {
    ring: BTreeMap<u32, NodeEndpoint>,
}

impl ConsistentHashLocator {
    pub fn new(nodes: &[NodeEndpoint]) -> Self {
        let mut ring = BTreeMap::new();
        for node in nodes {
            for i in 0..POINTS_PER_NODE {
                let point = fnv1a(format!("{node}-{i}").as_bytes());
                // First server wins a (rare) point collision
                ring.entry(point).or_insert_with(|| node.clone());
            }
        }
        Self { ring }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl NodeLocator for ConsistentHashLocator {
    fn locate(&self, key: &str) -> Option<&NodeEndpoint> {
        let hash = fnv1a(key.as_bytes());
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node)
    }
}

/// FNV-1a hash (32-bit).
fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
