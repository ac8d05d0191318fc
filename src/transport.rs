// ABOUTME: Transport seam for establishing connections to cache nodes
// ABOUTME: Connector trait plus the TCP implementation applying keep-alive and linger options

//! Transport connectors.
//!
//! Node pools never open sockets themselves; they ask a [`Connector`] for a
//! stream. [`TcpConnector`] is the production implementation. Tests plug in
//! in-memory connectors built on `tokio::io::duplex`.

use std::future::Future;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::{NodeEndpoint, SocketPoolConfig};
use crate::error::{PoolError, PoolResult, TimeoutKind};

/// Opens transport streams to cache nodes
pub trait Connector: Send + Sync + 'static {
    /// Stream type handed to pooled sockets
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a stream to `endpoint`, giving up after `timeout`
    fn connect(
        &self,
        endpoint: &NodeEndpoint,
        timeout: Duration,
    ) -> impl Future<Output = PoolResult<Self::Stream>> + Send;
}

/// Connect through `connector`, enforcing `timeout` regardless of whether the
/// connector honours it itself
pub(crate) async fn connect_within<C: Connector>(
    connector: &C,
    endpoint: &NodeEndpoint,
    timeout: Duration,
) -> PoolResult<C::Stream> {
    match tokio::time::timeout(timeout, connector.connect(endpoint, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(PoolError::Timeout {
            endpoint: endpoint.clone(),
            kind: TimeoutKind::Connect,
            after: timeout,
        }),
    }
}

// === TCP Connector ===

/// Plain TCP connector
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    /// Keep-alive idle time and probe interval, `None` when disabled
    keep_alive: Option<(Duration, Duration)>,
    /// Reset the connection on close instead of a graceful FIN
    abortive_close: bool,
}

impl TcpConnector {
    /// Connector with OS defaults for every socket option
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector applying the socket options from `config`
    pub fn from_config(config: &SocketPoolConfig) -> Self {
        let keep_alive = config
            .tcp_keep_alive_enabled()
            .then(|| (config.tcp_keep_alive_time(), config.tcp_keep_alive_interval()));

        Self {
            keep_alive,
            abortive_close: config.linger() == Some(Duration::ZERO),
        }
    }

    fn apply_socket_options(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(true)?;

        let socket = SockRef::from(stream);
        if let Some((time, interval)) = self.keep_alive {
            let keepalive = TcpKeepalive::new().with_time(time).with_interval(interval);
            socket.set_tcp_keepalive(&keepalive)?;
        }
        if self.abortive_close {
            socket.set_linger(Some(Duration::ZERO))?;
        }
        Ok(())
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, endpoint: &NodeEndpoint, timeout: Duration) -> PoolResult<TcpStream> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(endpoint.as_str())).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(PoolError::Connect {
                    endpoint: endpoint.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(PoolError::Timeout {
                    endpoint: endpoint.clone(),
                    kind: TimeoutKind::Connect,
                    after: timeout,
                })
            }
        };

        self.apply_socket_options(&stream)
            .map_err(|source| PoolError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        debug!(
            endpoint = %endpoint,
            keep_alive = self.keep_alive.is_some(),
            abortive_close = self.abortive_close,
            "TCP connection established"
        );
        Ok(stream)
    }
}
