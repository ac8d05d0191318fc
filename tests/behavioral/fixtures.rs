// ABOUTME: Shared test fixtures and utilities for behavioral tests
//
// Provides:
// - MockConnector: in-memory connector with switchable refusal and latency
// - EchoServer: loopback TCP server echoing whatever it receives
// - settings(): small, fast pool settings for timing-sensitive tests

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cache_pool::{Connector, FailurePolicy, NodeEndpoint, PoolError, PoolResult, PoolSettings};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// In-memory connector handing out `tokio::io::duplex` streams.
///
/// Server halves are kept alive so pooled sockets stay open until the test
/// calls `hang_up_all`.
#[derive(Default)]
pub struct MockConnector {
    refuse: AtomicBool,
    latency_ms: AtomicU64,
    connects: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) every subsequent connect
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Delay every subsequent connect
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(u64::try_from(latency.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Successful connects so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connect attempts so far, including refused ones
    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// When each connect attempt started, oldest first
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Close the server side of every connection handed out so far
    pub fn hang_up_all(&self) {
        self.peers.lock().unwrap().clear();
    }
}

impl Connector for MockConnector {
    type Stream = DuplexStream;

    async fn connect(&self, endpoint: &NodeEndpoint, _timeout: Duration) -> PoolResult<DuplexStream> {
        self.attempts.lock().unwrap().push(Instant::now());

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.refuse.load(Ordering::SeqCst) {
            return Err(PoolError::Connect {
                endpoint: endpoint.clone(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        let (client, server) = duplex(1024);
        self.peers.lock().unwrap().push(server);
        Ok(client)
    }
}

/// Loopback TCP server echoing every byte back
pub struct EchoServer {
    pub endpoint: NodeEndpoint,
    accept: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EchoServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = NodeEndpoint::new(listener.local_addr().unwrap().to_string()).unwrap();
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accept = {
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let handle = tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        loop {
                            match stream.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if stream.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                    connections.lock().unwrap().push(handle);
                }
            })
        };

        Self {
            endpoint,
            accept,
            connections,
        }
    }

    /// Stop listening and drop every open connection
    pub fn stop(&self) {
        self.accept.abort();
        for handle in self.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn endpoint(name: &str) -> NodeEndpoint {
    NodeEndpoint::new(format!("{name}:11211")).unwrap()
}

/// Small pool with short timeouts; no warm-up
pub fn settings() -> PoolSettings {
    PoolSettings {
        min_pool_size: 0,
        max_pool_size: 2,
        connection_timeout: Duration::from_millis(500),
        queue_timeout: Duration::from_millis(100),
        receive_timeout: Duration::from_millis(500),
        dead_timeout: Duration::from_millis(100),
        failure_policy: FailurePolicy::Throttling {
            threshold: 3,
            window: Duration::from_secs(10),
        },
        ..PoolSettings::default()
    }
}
