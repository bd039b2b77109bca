//! Binary protocol server for the broker.
//!
//! Speaks a length-prefixed command/response protocol over TCP. Every frame
//! is `[u8 command][u32 payload_len][payload]` with big-endian integers; the
//! supported commands cover produce, consume, next-offset, create-topic, and
//! list-topics. Push subscriptions are served by the WebSocket and SSE
//! front-ends, not this protocol.
//!
//! # Example
//! ```rust,no_run
//! use gazette::broker::Broker;
//! use gazette::server::BrokerServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> gazette::error::Result<()> {
//!     let broker = Arc::new(Broker::open("./data").await?);
//!     let server = BrokerServer::new("127.0.0.1:9440", broker).await?;
//!     server.run().await
//! }
//! ```

mod connection;
pub mod request;
pub mod response;

pub use connection::ClientConnection;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};

use crate::broker::Broker;
use crate::constants::{DEFAULT_MAX_CONNECTIONS_PER_IP, DEFAULT_MAX_TOTAL_CONNECTIONS};
use crate::error::Result;

/// A TCP server for the binary protocol with graceful shutdown support.
pub struct BrokerServer {
    listener: TcpListener,
    broker: Arc<Broker>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    /// Active connection counter
    active_connections: Arc<AtomicUsize>,
    /// Per-IP connection counts, to keep one client from exhausting us
    connections_per_ip: Arc<RwLock<HashMap<IpAddr, usize>>>,
    max_connections_per_ip: usize,
    max_total_connections: usize,
}

impl BrokerServer {
    /// Create a server bound to `addr` with default connection limits.
    pub async fn new(addr: &str, broker: Arc<Broker>) -> Result<Self> {
        Self::with_config(
            addr,
            broker,
            DEFAULT_MAX_CONNECTIONS_PER_IP,
            DEFAULT_MAX_TOTAL_CONNECTIONS,
        )
        .await
    }

    /// Create a server with explicit connection limits.
    ///
    /// * `max_connections_per_ip` - maximum connections from a single IP
    /// * `max_total_connections` - maximum total connections (0 = unlimited)
    pub async fn with_config(
        addr: &str,
        broker: Arc<Broker>,
        max_connections_per_ip: usize,
        max_total_connections: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        tracing::info!(
            addr = %addr,
            max_per_ip = max_connections_per_ip,
            max_total = max_total_connections,
            "broker server listening"
        );

        Ok(Self {
            listener,
            broker,
            shutdown_tx,
            active_connections: Arc::new(AtomicUsize::new(0)),
            connections_per_ip: Arc::new(RwLock::new(HashMap::new())),
            max_connections_per_ip,
            max_total_connections,
        })
    }

    /// The local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of currently active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Signal the server to stop accepting new connections.
    ///
    /// Existing connections are allowed to complete; use
    /// [`shutdown_and_wait`](Self::shutdown_and_wait) to wait for them.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        tracing::info!("shutdown signal sent");
    }

    /// Initiate shutdown and wait up to `timeout` for connections to drain.
    ///
    /// Returns `true` if all connections drained in time.
    pub async fn shutdown_and_wait(&self, timeout: std::time::Duration) -> bool {
        self.shutdown();

        let start = std::time::Instant::now();
        let check_interval = std::time::Duration::from_millis(100);

        while start.elapsed() < timeout {
            let active = self.active_connections.load(Ordering::SeqCst);
            if active == 0 {
                tracing::info!("all connections drained");
                return true;
            }
            tracing::debug!(active_connections = active, "waiting for connections to drain");
            tokio::time::sleep(check_interval).await;
        }

        let remaining = self.active_connections.load(Ordering::SeqCst);
        tracing::warn!(
            remaining_connections = remaining,
            "shutdown timeout, connections still active"
        );
        false
    }

    /// Accept and serve connections until a shutdown signal arrives.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down, no longer accepting connections");
                    return Ok(());
                }
                accept_result = self.listener.accept() => {
                    let (stream, addr) = accept_result?;
                    let ip = addr.ip();

                    // Global connection limit (0 = unlimited)
                    if self.max_total_connections > 0 {
                        let current_total = self.active_connections.load(Ordering::SeqCst);
                        if current_total >= self.max_total_connections {
                            tracing::warn!(
                                client_ip = %ip,
                                current_connections = current_total,
                                max_connections = self.max_total_connections,
                                "rejecting connection: global limit exceeded"
                            );
                            drop(stream);
                            continue;
                        }
                    }

                    // Per-IP connection limit
                    let current_count = {
                        let counts = self.connections_per_ip.read().await;
                        *counts.get(&ip).unwrap_or(&0)
                    };
                    if current_count >= self.max_connections_per_ip {
                        tracing::warn!(
                            client_ip = %ip,
                            current_connections = current_count,
                            max_connections = self.max_connections_per_ip,
                            "rejecting connection: per-IP limit exceeded"
                        );
                        drop(stream);
                        continue;
                    }

                    {
                        let mut counts = self.connections_per_ip.write().await;
                        *counts.entry(ip).or_insert(0) += 1;
                    }

                    tracing::debug!(client_addr = %addr, "accepted connection");

                    let broker = self.broker.clone();
                    let active_connections = self.active_connections.clone();
                    let connections_per_ip = self.connections_per_ip.clone();

                    active_connections.fetch_add(1, Ordering::SeqCst);

                    tokio::spawn(async move {
                        let mut conn = ClientConnection::new(stream, addr);
                        if let Err(e) = conn.handle_requests(broker).await {
                            tracing::error!(client_addr = %addr, error = ?e, "error handling connection");
                        }
                        active_connections.fetch_sub(1, Ordering::SeqCst);

                        let mut counts = connections_per_ip.write().await;
                        if let Some(count) = counts.get_mut(&ip) {
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                counts.remove(&ip);
                            }
                        }
                    });
                }
            }
        }
    }

    /// Serve a single connection to completion (useful for testing).
    pub async fn accept_one(&self) -> Result<()> {
        let (stream, addr) = self.listener.accept().await?;
        tracing::debug!(client_addr = %addr, "accepted connection");

        let broker = self.broker.clone();
        let mut conn = ClientConnection::new(stream, addr);
        conn.handle_requests(broker).await
    }
}
