// ABOUTME: Per-node counters for socket pool observability
//
// Tracks:
// - Acquisitions: total, served from idle, served by a new connection
// - Failures: exhausted waits, fast-fails on dead nodes, connect failures
// - Releases: healthy vs failed
// - Health: dead transitions and revivals

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one node pool
#[derive(Debug, Default)]
pub struct NodeMetrics {
    pub acquired: AtomicU64,
    pub reused: AtomicU64,
    pub created: AtomicU64,
    pub exhausted: AtomicU64,
    pub rejected_dead: AtomicU64,
    pub connect_failures: AtomicU64,
    pub released_ok: AtomicU64,
    pub released_failed: AtomicU64,
    pub marked_dead: AtomicU64,
    pub revived: AtomicU64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket_reused(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn socket_created(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Socket created by warm-up rather than for a caller
    pub fn socket_prewarmed(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pool_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_dead(&self) {
        self.rejected_dead.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn released(&self, success: bool) {
        if success {
            self.released_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.released_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn node_marked_dead(&self) {
        self.marked_dead.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_revived(&self) {
        self.revived.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquired: self.acquired.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            rejected_dead: self.rejected_dead.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            released_ok: self.released_ok.load(Ordering::Relaxed),
            released_failed: self.released_failed.load(Ordering::Relaxed),
            marked_dead: self.marked_dead.load(Ordering::Relaxed),
            revived: self.revived.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`NodeMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub acquired: u64,
    pub reused: u64,
    pub created: u64,
    pub exhausted: u64,
    pub rejected_dead: u64,
    pub connect_failures: u64,
    pub released_ok: u64,
    pub released_failed: u64,
    pub marked_dead: u64,
    pub revived: u64,
}
