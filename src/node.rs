// ABOUTME: Per-server socket pool with bounded size, queue timeout and dead-node quarantine
// ABOUTME: Hands out sockets, takes them back, tracks failures and revives dead servers in the background

//! Node pool.
//!
//! One `NodePool` owns every socket to a single cache server.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        NodePool                           │
//! │                                                           │
//! │  acquire ──▶ Semaphore (max_pool_size permits)            │
//! │                 │                                         │
//! │                 ├──▶ idle set ──▶ reuse socket            │
//! │                 └──▶ Connector ──▶ new socket             │
//! │                                                           │
//! │  release ──▶ reset() ──▶ idle set (healthy)               │
//! │                 └──────▶ close + FailurePolicy (failed)   │
//! │                                   │                       │
//! │                                   ▼                       │
//! │                         Dead ──▶ revival probe task       │
//! │                                   (every dead_timeout)    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Each leased or connecting socket holds one semaphore permit. New sockets
//! are only created when the idle set is empty (or by warm-up, which stops
//! at `min_pool_size`), so idle + in use + connecting never exceeds
//! `max_pool_size`. The state mutex is never held across an `.await`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{NodeEndpoint, SocketPoolConfig};
use crate::error::{PoolError, PoolResult};
use crate::failure_policy::{FailurePolicy, FailureState};
use crate::health::{NodeHealth, NodeSnapshot, PoolEvent};
use crate::metrics::NodeMetrics;
use crate::socket::{LeaseGuard, PooledSocket, SocketLease};
use crate::transport::{connect_within, Connector};

/// Event channel capacity for standalone node pools
const EVENT_CAPACITY: usize = 64;

// === Shared State ===

struct NodeState<S> {
    idle: Vec<PooledSocket<S>>,
    connecting: usize,
    health: NodeHealth,
    failures: FailureState,
    dead_since: Option<DateTime<Utc>>,
    probe: Option<JoinHandle<()>>,
    draining: bool,
}

impl<S> Drop for NodeState<S> {
    fn drop(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
    }
}

struct NodeShared<C: Connector> {
    endpoint: NodeEndpoint,
    config: Arc<SocketPoolConfig>,
    policy: FailurePolicy,
    connector: Arc<C>,
    slots: Arc<Semaphore>,
    outstanding: Arc<AtomicUsize>,
    state: Mutex<NodeState<C::Stream>>,
    metrics: NodeMetrics,
    events: broadcast::Sender<PoolEvent>,
}

/// Connect slot reserved under the lock; given back on drop if never completed
struct Reservation<'a, C: Connector> {
    shared: &'a NodeShared<C>,
    armed: bool,
}

impl<'a, C: Connector> Reservation<'a, C> {
    fn new(shared: &'a NodeShared<C>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    /// Give the slot back while the caller already holds the lock
    fn complete(mut self, state: &mut NodeState<C::Stream>) {
        state.connecting = state.connecting.saturating_sub(1);
        self.armed = false;
    }
}

impl<C: Connector> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.lock();
            state.connecting = state.connecting.saturating_sub(1);
        }
    }
}

impl<C: Connector> NodeShared<C> {
    fn lock(&self) -> MutexGuard<'_, NodeState<C::Stream>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_socket(&self, stream: C::Stream) -> PooledSocket<C::Stream> {
        PooledSocket::new(
            stream,
            self.endpoint.clone(),
            self.config.receive_timeout(),
            self.config.linger(),
        )
    }

    fn lease(
        &self,
        mut socket: PooledSocket<C::Stream>,
        permit: OwnedSemaphorePermit,
    ) -> SocketLease<C::Stream> {
        socket.mark_in_use();
        SocketLease::new(socket, permit, LeaseGuard::new(Arc::clone(&self.outstanding)))
    }

    fn shut_down(&self) -> PoolError {
        PoolError::ShutDown {
            endpoint: self.endpoint.clone(),
        }
    }

    fn check_accepting(&self) -> PoolResult<()> {
        let state = self.lock();
        if state.draining {
            return Err(self.shut_down());
        }
        if state.health == NodeHealth::Dead {
            self.metrics.rejected_dead();
            return Err(PoolError::NodeDead {
                endpoint: self.endpoint.clone(),
            });
        }
        Ok(())
    }

    fn exhausted(&self, waited: Duration) -> PoolError {
        self.metrics.pool_exhausted();
        warn!(
            endpoint = %self.endpoint,
            waited_ms = %waited.as_millis(),
            max_pool_size = self.config.max_pool_size(),
            "Socket pool exhausted"
        );
        let _ = self.events.send(PoolEvent::PoolExhausted {
            endpoint: self.endpoint.clone(),
            waited,
        });
        PoolError::PoolExhausted {
            endpoint: self.endpoint.clone(),
            waited,
        }
    }

    /// Feed one failure to the policy; on the Alive → Dead transition start
    /// the revival probe and hand back the idle sockets for closing.
    fn record_failure(
        self: &Arc<Self>,
        state: &mut NodeState<C::Stream>,
    ) -> Vec<PooledSocket<C::Stream>> {
        if state.health == NodeHealth::Dead || state.draining {
            return Vec::new();
        }

        if !self
            .policy
            .should_fail(&mut state.failures, std::time::Instant::now())
        {
            debug!(
                endpoint = %self.endpoint,
                failures = state.failures.failure_count(),
                "Node failure recorded"
            );
            return Vec::new();
        }

        state.health = NodeHealth::Dead;
        state.dead_since = Some(Utc::now());
        self.metrics.node_marked_dead();

        let dead_timeout = self.config.dead_timeout();
        warn!(
            endpoint = %self.endpoint,
            failures = state.failures.failure_count(),
            retry_in_ms = %dead_timeout.as_millis(),
            "Node marked dead"
        );
        let _ = self.events.send(PoolEvent::NodeDead {
            endpoint: self.endpoint.clone(),
        });

        state.probe = Some(tokio::spawn(revival_loop(
            Arc::downgrade(self),
            dead_timeout,
        )));
        std::mem::take(&mut state.idle)
    }

    fn record_success(&self, state: &mut NodeState<C::Stream>) {
        if state.health == NodeHealth::Alive {
            self.policy.success(&mut state.failures);
        }
    }

    /// Flip back to Alive after a successful probe. `false` if the pool was
    /// drained in the meantime.
    fn revive(&self) -> bool {
        {
            let mut state = self.lock();
            if state.draining {
                return false;
            }
            state.health = NodeHealth::Alive;
            self.policy.success(&mut state.failures);
            state.dead_since = None;
            // Detaches; this runs on the probe task itself
            state.probe = None;
        }

        self.metrics.node_revived();
        info!(endpoint = %self.endpoint, "Node revived");
        let _ = self.events.send(PoolEvent::NodeRevived {
            endpoint: self.endpoint.clone(),
        });
        true
    }

    async fn warm_up(self: &Arc<Self>) -> usize {
        let min = self.config.min_pool_size();
        let mut created = 0;

        while created < min {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };

            {
                let mut state = self.lock();
                let total = state.idle.len()
                    + self.outstanding.load(Ordering::SeqCst)
                    + state.connecting;
                if state.draining || state.health == NodeHealth::Dead || total >= min {
                    break;
                }
                state.connecting += 1;
            }

            let reservation = Reservation::new(self);
            match connect_within(&*self.connector, &self.endpoint, self.config.connection_timeout())
                .await
            {
                Ok(stream) => {
                    let mut socket = self.new_socket(stream);
                    socket.reset();
                    let rejected = {
                        let mut state = self.lock();
                        reservation.complete(&mut state);
                        if state.draining || state.health == NodeHealth::Dead {
                            Some(socket)
                        } else {
                            state.idle.push(socket);
                            None
                        }
                    };
                    drop(permit);

                    if let Some(mut socket) = rejected {
                        socket.close().await;
                        break;
                    }
                    self.metrics.socket_prewarmed();
                    created += 1;
                }
                Err(e) => {
                    self.metrics.connect_failed();
                    warn!(endpoint = %self.endpoint, error = %e, "Warm-up connection failed");
                    let doomed = {
                        let mut state = self.lock();
                        reservation.complete(&mut state);
                        self.record_failure(&mut state)
                    };
                    drop(permit);
                    close_all(doomed).await;
                    break;
                }
            }
        }

        if created > 0 {
            debug!(endpoint = %self.endpoint, created, "Node pool warmed up");
        }
        created
    }
}

async fn close_all<S>(sockets: Vec<PooledSocket<S>>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    if sockets.is_empty() {
        return;
    }
    join_all(sockets.into_iter().map(|mut socket| async move {
        socket.close().await;
    }))
    .await;
}

/// Probe a dead node every `dead_timeout` until it answers again.
///
/// Holds only a weak reference between probes so a dropped pool ends the loop.
/// The probe connection never takes a pool slot.
async fn revival_loop<C: Connector>(node: Weak<NodeShared<C>>, dead_timeout: Duration) {
    loop {
        tokio::time::sleep(dead_timeout).await;

        let Some(shared) = node.upgrade() else {
            break;
        };
        if shared.lock().draining {
            break;
        }

        debug!(endpoint = %shared.endpoint, "Probing dead node");
        match connect_within(
            &*shared.connector,
            &shared.endpoint,
            shared.config.connection_timeout(),
        )
        .await
        {
            Ok(stream) => {
                drop(stream);
                if shared.revive() {
                    shared.warm_up().await;
                }
                break;
            }
            Err(e) => {
                debug!(
                    endpoint = %shared.endpoint,
                    error = %e,
                    retry_in_ms = %dead_timeout.as_millis(),
                    "Revival probe failed"
                );
            }
        }
    }
}

// === Node Pool ===

/// Socket pool for one cache server
pub struct NodePool<C: Connector> {
    shared: Arc<NodeShared<C>>,
}

impl<C: Connector> Clone for NodePool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> std::fmt::Debug for NodePool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("endpoint", &self.shared.endpoint)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> NodePool<C> {
    /// Create an empty pool in the Alive state. No connections are opened
    /// until the first `acquire` or `warm_up`.
    pub fn new(endpoint: NodeEndpoint, config: Arc<SocketPoolConfig>, connector: Arc<C>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_events(endpoint, config, connector, events)
    }

    pub(crate) fn with_events(
        endpoint: NodeEndpoint,
        config: Arc<SocketPoolConfig>,
        connector: Arc<C>,
        events: broadcast::Sender<PoolEvent>,
    ) -> Self {
        let policy = config.failure_policy();
        let state = NodeState {
            idle: Vec::with_capacity(config.max_pool_size()),
            connecting: 0,
            health: NodeHealth::Alive,
            failures: policy.new_state(),
            dead_since: None,
            probe: None,
            draining: false,
        };

        Self {
            shared: Arc::new(NodeShared {
                slots: Arc::new(Semaphore::new(config.max_pool_size())),
                endpoint,
                config,
                policy,
                connector,
                outstanding: Arc::new(AtomicUsize::new(0)),
                state: Mutex::new(state),
                metrics: NodeMetrics::new(),
                events,
            }),
        }
    }

    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.shared.endpoint
    }

    pub fn config(&self) -> &SocketPoolConfig {
        &self.shared.config
    }

    /// Authoritative liveness. Set Dead by the failure policy, set Alive
    /// again only by a successful revival probe.
    pub fn health(&self) -> NodeHealth {
        self.shared.lock().health
    }

    pub fn is_alive(&self) -> bool {
        self.health() == NodeHealth::Alive
    }

    /// Failures recorded since the last success
    pub fn failure_count(&self) -> u32 {
        self.shared.lock().failures.failure_count()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.lock().idle.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.shared.metrics
    }

    /// Receive dead/revived/exhausted events for this node
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events.subscribe()
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let state = self.shared.lock();
        NodeSnapshot {
            endpoint: self.shared.endpoint.clone(),
            health: state.health,
            idle: state.idle.len(),
            in_use: self.shared.outstanding.load(Ordering::SeqCst),
            connecting: state.connecting,
            failure_count: state.failures.failure_count(),
            dead_since: state.dead_since,
            metrics: self.shared.metrics.snapshot(),
        }
    }

    /// Borrow a socket, waiting at most the configured `queue_timeout`
    pub async fn acquire(&self) -> PoolResult<SocketLease<C::Stream>> {
        self.acquire_within(self.shared.config.queue_timeout()).await
    }

    /// Borrow a socket, waiting at most `queue_timeout` overall.
    ///
    /// Fails fast with `NodeDead` while the node is quarantined. Reuses an idle
    /// socket when one exists, otherwise connects a new one within whatever
    /// is left of the queue budget (capped by `connection_timeout`).
    pub async fn acquire_within(
        &self,
        queue_timeout: Duration,
    ) -> PoolResult<SocketLease<C::Stream>> {
        let shared = &self.shared;
        shared.check_accepting()?;

        let started = Instant::now();
        let deadline = started + queue_timeout;

        let permit =
            match tokio::time::timeout_at(deadline, Arc::clone(&shared.slots).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(shared.shut_down()),
                Err(_) => return Err(shared.exhausted(started.elapsed())),
            };

        {
            let mut state = shared.lock();
            if state.draining {
                return Err(shared.shut_down());
            }
            if let Some(socket) = state.idle.pop() {
                drop(state);
                shared.metrics.socket_reused();
                debug!(endpoint = %shared.endpoint, socket = %socket.id(), "Reusing idle socket");
                return Ok(shared.lease(socket, permit));
            }
            state.connecting += 1;
        }

        let reservation = Reservation::new(shared);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let connection_timeout = shared.config.connection_timeout();
        let budget_bound = remaining < connection_timeout;
        let connect_timeout = connection_timeout.min(remaining);

        match connect_within(&*shared.connector, &shared.endpoint, connect_timeout).await {
            Ok(stream) => {
                let mut socket = shared.new_socket(stream);
                let draining = {
                    let mut state = shared.lock();
                    reservation.complete(&mut state);
                    state.draining
                };
                if draining {
                    socket.close().await;
                    return Err(shared.shut_down());
                }

                shared.metrics.socket_created();
                debug!(endpoint = %shared.endpoint, socket = %socket.id(), "Created new socket");
                Ok(shared.lease(socket, permit))
            }
            // The caller's queue budget ran out, not the node's connect timeout
            Err(PoolError::Timeout { .. }) if budget_bound => {
                drop(reservation);
                Err(shared.exhausted(started.elapsed()))
            }
            Err(e) => {
                shared.metrics.connect_failed();
                warn!(endpoint = %shared.endpoint, error = %e, "Failed to open socket");
                let doomed = {
                    let mut state = shared.lock();
                    reservation.complete(&mut state);
                    shared.record_failure(&mut state)
                };
                drop(permit);
                close_all(doomed).await;
                Err(e)
            }
        }
    }

    /// Return a borrowed socket.
    ///
    /// `success = true` resets the socket and parks it in the idle set (or
    /// closes it if it cannot be reused or the node is dead or draining).
    /// `success = false` closes it and counts a failure against the node.
    /// Never fails; a lease issued by a different pool (even one for the
    /// same endpoint) is closed and ignored, its slot going back to its owner.
    pub async fn release(&self, lease: SocketLease<C::Stream>, success: bool) {
        let shared = &self.shared;
        let SocketLease {
            mut socket,
            permit,
            guard,
        } = lease;

        if !guard.issued_by(&shared.outstanding) {
            warn!(
                endpoint = %shared.endpoint,
                socket_endpoint = %socket.endpoint(),
                socket = %socket.id(),
                "Released socket belongs to another pool; closing it"
            );
            drop(guard);
            drop(permit);
            socket.close().await;
            return;
        }

        shared.metrics.released(success);
        let reusable = success && socket.reset();

        let doomed = {
            let mut state = shared.lock();
            let mut doomed = if success {
                shared.record_success(&mut state);
                Vec::new()
            } else {
                shared.record_failure(&mut state)
            };

            if reusable && !state.draining && state.health == NodeHealth::Alive {
                state.idle.push(socket);
            } else {
                doomed.push(socket);
            }
            doomed
        };

        // Slot frees only after the socket is parked so a waiter can pick it up
        drop(guard);
        drop(permit);
        close_all(doomed).await;
    }

    /// Open sockets until `min_pool_size` exist. Returns how many were created.
    ///
    /// Stops early at the first connect failure (which feeds the failure
    /// policy), when the node is dead or draining, or when no slot is free.
    pub async fn warm_up(&self) -> usize {
        self.shared.warm_up().await
    }

    /// Stop accepting acquisitions and close every idle socket.
    ///
    /// Waiters are woken with `ShutDown`; leased sockets are closed as they
    /// come back. Returns the number of idle sockets closed.
    pub async fn drain(&self) -> usize {
        let (doomed, probe) = {
            let mut state = self.shared.lock();
            state.draining = true;
            (std::mem::take(&mut state.idle), state.probe.take())
        };

        self.shared.slots.close();
        if let Some(probe) = probe {
            probe.abort();
        }

        let closed = doomed.len();
        close_all(doomed).await;
        info!(
            endpoint = %self.shared.endpoint,
            closed,
            in_use = self.in_use_count(),
            "Node pool drained"
        );
        closed
    }

    pub fn is_draining(&self) -> bool {
        self.shared.lock().draining
    }
}
