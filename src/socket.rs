// ABOUTME: Pooled socket wrapper owning one transport connection to a cache node
//
// Tracks the socket lifecycle (connected, in use, idle, closed) and usage
// timestamps. Every send/receive is bounded by the receive timeout, close
// honours the linger settings, and reset discards leftovers from the previous
// unit of work so the next borrower starts from a clean stream.

use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;
use uuid::Uuid;

use crate::config::NodeEndpoint;
use crate::error::{PoolError, PoolResult, TimeoutKind};

/// Reads attempted by `reset()` before giving up on a chatty peer
const MAX_RESET_READS: usize = 64;

// === Socket State ===

/// Lifecycle state of a pooled socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SocketState {
    /// Transport established, not yet handed out
    Connected,
    /// Borrowed by a caller
    InUse,
    /// Sitting in the node pool's idle set
    Idle,
    /// Underlying connection released
    Closed,
}

// === Pooled Socket ===

/// One reusable connection to a cache node
pub struct PooledSocket<S> {
    id: Uuid,
    endpoint: NodeEndpoint,
    stream: Option<S>,
    state: SocketState,
    created_at: Instant,
    last_used: Instant,
    receive_timeout: Duration,
    linger: Option<Duration>,
}

impl<S> std::fmt::Debug for PooledSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSocket")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("idle_for", &self.last_used.elapsed())
            .finish()
    }
}

impl<S> PooledSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established connection
    ///
    /// * `receive_timeout` - bound for each send/receive
    /// * `linger` - graceful close bound, `None` to release immediately
    pub fn new(
        stream: S,
        endpoint: NodeEndpoint,
        receive_timeout: Duration,
        linger: Option<Duration>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            endpoint,
            stream: Some(stream),
            state: SocketState::Connected,
            created_at: now,
            last_used: now,
            receive_timeout,
            linger,
        }
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub const fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    pub const fn state(&self) -> SocketState {
        self.state
    }

    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    pub const fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Time since the socket was last used
    pub fn idle_duration(&self) -> Duration {
        self.last_used.elapsed()
    }

    pub const fn is_closed(&self) -> bool {
        matches!(self.state, SocketState::Closed)
    }

    pub(crate) fn mark_in_use(&mut self) {
        self.state = SocketState::InUse;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    fn timeout_error(&self, kind: TimeoutKind) -> PoolError {
        PoolError::Timeout {
            endpoint: self.endpoint.clone(),
            kind,
            after: self.receive_timeout,
        }
    }

    fn transport_error(&self, source: io::Error) -> PoolError {
        PoolError::Transport {
            endpoint: self.endpoint.clone(),
            source,
        }
    }

    fn closed_error(&self) -> PoolError {
        self.transport_error(io::Error::new(
            io::ErrorKind::NotConnected,
            "socket is closed",
        ))
    }

    /// Write all of `data` and flush it
    pub async fn send(&mut self, data: &[u8]) -> PoolResult<()> {
        let timeout = self.receive_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.closed_error());
        };

        let result = tokio::time::timeout(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await;

        self.touch();
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.transport_error(e)),
            Err(_) => Err(self.timeout_error(TimeoutKind::Send)),
        }
    }

    /// Read whatever is available into `buf`, waiting up to the receive timeout
    ///
    /// A closed peer is reported as a transport error rather than `Ok(0)`.
    pub async fn receive(&mut self, buf: &mut [u8]) -> PoolResult<usize> {
        let timeout = self.receive_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.closed_error());
        };

        let result = tokio::time::timeout(timeout, stream.read(buf)).await;

        self.touch();
        match result {
            Ok(Ok(0)) if !buf.is_empty() => Err(self.transport_error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(self.transport_error(e)),
            Err(_) => Err(self.timeout_error(TimeoutKind::Receive)),
        }
    }

    /// Fill `buf` completely, waiting up to the receive timeout overall
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> PoolResult<()> {
        let timeout = self.receive_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.closed_error());
        };

        let result = tokio::time::timeout(timeout, stream.read_exact(buf)).await;

        self.touch();
        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self.transport_error(e)),
            Err(_) => Err(self.timeout_error(TimeoutKind::Receive)),
        }
    }

    /// Prepare the socket for the next borrower without closing it.
    ///
    /// Discards any bytes the previous unit of work left unread. Returns
    /// `false` when the connection is no longer usable (peer closed, read
    /// error pending, or a peer that keeps streaming), in which case the
    /// caller must close it instead of pooling it.
    pub fn reset(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut scratch = [0u8; 1024];
        let mut discarded = 0usize;
        let mut drained = false;

        for _ in 0..MAX_RESET_READS {
            match stream.read(&mut scratch).now_or_never() {
                None => {
                    drained = true;
                    break;
                }
                Some(Ok(0) | Err(_)) => return false,
                Some(Ok(n)) => discarded += n,
            }
        }

        if !drained {
            return false;
        }

        if discarded > 0 {
            debug!(
                socket = %self.id,
                endpoint = %self.endpoint,
                bytes = discarded,
                "Discarded unread data while resetting socket"
            );
        }

        self.state = SocketState::Idle;
        self.touch();
        true
    }

    /// Release the underlying connection. Safe to call more than once.
    ///
    /// With linger enabled and a non-zero linger time the write side is shut
    /// down gracefully, bounded by the linger time, before the connection is
    /// dropped.
    pub async fn close(&mut self) {
        self.state = SocketState::Closed;
        let Some(mut stream) = self.stream.take() else {
            return;
        };

        if let Some(linger) = self.linger.filter(|l| !l.is_zero()) {
            match tokio::time::timeout(linger, stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(socket = %self.id, error = %e, "Graceful shutdown failed");
                }
                Err(_) => {
                    debug!(socket = %self.id, linger_ms = %linger.as_millis(), "Linger time elapsed");
                }
            }
        }

        drop(stream);
        debug!(socket = %self.id, endpoint = %self.endpoint, "Socket closed");
    }
}

// === Socket Lease ===

/// Decrements the owning pool's outstanding count when a lease goes away
pub(crate) struct LeaseGuard {
    outstanding: Arc<AtomicUsize>,
}

impl LeaseGuard {
    pub(crate) fn new(outstanding: Arc<AtomicUsize>) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        Self { outstanding }
    }

    /// Whether this guard was issued by the pool owning `outstanding`
    pub(crate) fn issued_by(&self, outstanding: &Arc<AtomicUsize>) -> bool {
        Arc::ptr_eq(&self.outstanding, outstanding)
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A socket borrowed from a node pool.
///
/// Hand it back with `NodePool::release` (or `PoolRegistry::release`),
/// reporting whether the unit of work succeeded. A lease dropped without
/// being released closes its socket and frees the slot without counting
/// against the node's health.
pub struct SocketLease<S> {
    pub(crate) socket: PooledSocket<S>,
    pub(crate) permit: OwnedSemaphorePermit,
    pub(crate) guard: LeaseGuard,
}

impl<S> SocketLease<S> {
    pub(crate) const fn new(
        socket: PooledSocket<S>,
        permit: OwnedSemaphorePermit,
        guard: LeaseGuard,
    ) -> Self {
        Self {
            socket,
            permit,
            guard,
        }
    }
}

impl<S> std::fmt::Debug for SocketLease<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketLease")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl<S> Deref for SocketLease<S> {
    type Target = PooledSocket<S>;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl<S> DerefMut for SocketLease<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.socket
    }
}
