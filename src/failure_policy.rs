// ABOUTME: Failure policies deciding when a cache node should be considered dead
//
// A policy never performs I/O. It only looks at the failure/success signals the
// node pool records and answers "should this node be marked dead now?".
// Each node pool owns one `FailureState` and only touches it under its lock.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;
use crate::error::ConfigError;

// === Failure Policy ===

/// Strategy for turning failures into an Alive/Dead verdict
///
/// Selected once in configuration; every node pool gets its own
/// [`FailureState`] from [`FailurePolicy::new_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Dead once `threshold` consecutive failures land within `window`
    Throttling {
        /// Failures required to mark the node dead
        threshold: u32,
        /// Sliding window the failures must fall into
        #[serde(with = "duration_millis")]
        window: Duration,
    },

    /// Dead on the first failure
    FailImmediately,

    /// Never marks a node dead
    AlwaysAlive,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Throttling {
            threshold: 5,
            window: Duration::from_secs(2),
        }
    }
}

impl FailurePolicy {
    /// Fresh per-node state
    pub fn new_state(&self) -> FailureState {
        FailureState::default()
    }

    /// Record one failure and decide whether the node should be marked dead now
    pub fn should_fail(&self, state: &mut FailureState, now: Instant) -> bool {
        state.consecutive = state.consecutive.saturating_add(1);

        match *self {
            Self::Throttling { threshold, window } => {
                // Forget failures that slid out of the window
                while let Some(&oldest) = state.recent.front() {
                    if now.saturating_duration_since(oldest) > window {
                        state.recent.pop_front();
                    } else {
                        break;
                    }
                }

                state.recent.push_back(now);
                while state.recent.len() > threshold as usize {
                    state.recent.pop_front();
                }

                state.recent.len() >= threshold as usize
            }
            Self::FailImmediately => {
                state.recent.clear();
                state.recent.push_back(now);
                true
            }
            Self::AlwaysAlive => false,
        }
    }

    /// Record a success, clearing all failure tracking
    pub fn success(&self, state: &mut FailureState) {
        *state = self.new_state();
    }

    /// Current verdict for the recorded state.
    ///
    /// Agrees with the last `should_fail` answer. A node pool's `NodeHealth`
    /// is what gates acquisitions: once Dead, a node stays Dead until a
    /// revival probe succeeds, whatever this verdict says in between.
    pub fn is_alive(&self, state: &FailureState) -> bool {
        match *self {
            Self::Throttling { threshold, .. } => state.recent.len() < threshold as usize,
            Self::FailImmediately => state.recent.is_empty(),
            Self::AlwaysAlive => true,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Self::Throttling { threshold, window } = *self {
            if threshold == 0 {
                return Err(ConfigError::ZeroFailureThreshold);
            }
            if window.is_zero() {
                return Err(ConfigError::ZeroDuration {
                    field: "failure_policy.window",
                });
            }
        }
        Ok(())
    }
}

// === Failure State ===

/// Per-node failure tracking, mutated only through [`FailurePolicy`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureState {
    /// Failures since the last success
    consecutive: u32,

    /// Failure instants the policy still considers relevant
    recent: VecDeque<Instant>,
}

impl FailureState {
    /// Failures recorded since the last success
    pub const fn failure_count(&self) -> u32 {
        self.consecutive
    }
}
