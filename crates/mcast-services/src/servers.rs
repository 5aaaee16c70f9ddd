//! Content-server registry for rendezvous points.
//!
//! Each server has one long-lived control connection. A monitor task probes
//! it with PING/PONG on a fixed interval; stream setup and teardown borrow the
//! same connection through a [`ServerSession`], which pauses the monitor
//! for as long as it is held.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex, MutexGuard, RwLock};

use mcast_core::control::{CatalogEntry, ControlPacket};
use mcast_core::wire::Flags;

use crate::metrics::{MetricsSnapshot, ServerMetrics};
use crate::transport::{self, TransportError};

pub struct ServerInfo {
    address: SocketAddr,
    timeout: Duration,
    catalog: RwLock<Vec<CatalogEntry>>,
    metrics: Mutex<ServerMetrics>,
    streaming: DashSet<String>,
    conn: Mutex<Option<TcpStream>>,
    /// Number of live sessions. The monitor skips its tick while non-zero.
    paused: AtomicUsize,
}

/// Status view of one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub address: SocketAddr,
    pub catalog: Vec<CatalogEntry>,
    pub metrics: MetricsSnapshot,
    pub streaming: Vec<String>,
    pub connected: bool,
}

impl ServerInfo {
    pub fn new(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            address,
            timeout,
            catalog: RwLock::new(Vec::new()),
            metrics: Mutex::new(ServerMetrics::new()),
            streaming: DashSet::new(),
            conn: Mutex::new(None),
            paused: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        self.catalog.read().await.clone()
    }

    pub async fn offers(&self, content: &str) -> bool {
        self.catalog.read().await.iter().any(|e| e.name == content)
    }

    pub async fn score(&self) -> f64 {
        self.metrics.lock().await.score()
    }

    pub async fn record_rtt(&self, rtt: Duration) {
        self.metrics.lock().await.record(rtt);
    }

    pub fn is_streaming(&self, content: &str) -> bool {
        self.streaming.contains(content)
    }

    pub fn set_streaming(&self, content: &str) {
        self.streaming.insert(content.to_string());
    }

    pub fn unset_streaming(&self, content: &str) {
        self.streaming.remove(content);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire) > 0
    }

    /// Connect if needed, announcing ourselves with WAKE and storing the catalog.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut conn = self.conn.lock().await;
        self.ensure_connected(&mut conn).await.map(|_| ())
    }

    async fn ensure_connected<'c>(
        &self,
        conn: &'c mut Option<TcpStream>,
    ) -> Result<&'c mut TcpStream, TransportError> {
        if conn.is_none() {
            let mut stream = transport::connect(self.address, self.timeout).await?;
            let catalog: ControlPacket<Vec<CatalogEntry>> = transport::control_exchange(
                &mut stream,
                &ControlPacket::wake(),
                Flags::CONTENT,
                self.timeout,
            )
            .await?;
            tracing::info!(
                server = %self.address,
                items = catalog.payload.len(),
                "content server catalog received"
            );
            *self.catalog.write().await = catalog.payload;
            *conn = Some(stream);
        }
        conn.as_mut().ok_or(TransportError::Closed)
    }

    /// Borrow the control connection for an ad hoc exchange.
    /// Metrics are paused until the session is dropped.
    pub async fn session(&self) -> Result<ServerSession<'_>, TransportError> {
        let conn = self.conn.lock().await;
        // only count once the guard exists, so a cancelled wait cannot leak a pause
        self.paused.fetch_add(1, Ordering::AcqRel);
        let mut session = ServerSession { server: self, conn };
        tracing::debug!(server = %self.address, "metrics paused");
        self.ensure_connected(&mut session.conn).await?;
        Ok(session)
    }

    /// One PING/PONG round trip on the shared connection.
    /// A failure drops the connection so the next probe reconnects.
    pub async fn probe(&self) -> Result<Duration, TransportError> {
        let mut conn = self.conn.lock().await;
        let result = async {
            let stream = self.ensure_connected(&mut conn).await?;
            let started = Instant::now();
            let _: ControlPacket<String> = transport::control_exchange(
                stream,
                &ControlPacket::ping(),
                Flags::PONG,
                self.timeout,
            )
            .await?;
            Ok::<_, TransportError>(started.elapsed())
        }
        .await;

        match result {
            Ok(rtt) => {
                drop(conn);
                self.record_rtt(rtt).await;
                Ok(rtt)
            }
            Err(e) => {
                *conn = None;
                Err(e)
            }
        }
    }

    pub async fn snapshot(&self) -> ServerSnapshot {
        let mut streaming: Vec<String> = self.streaming.iter().map(|s| s.key().clone()).collect();
        streaming.sort();
        ServerSnapshot {
            address: self.address,
            catalog: self.catalog().await,
            metrics: self.metrics.lock().await.snapshot(),
            streaming,
            connected: match self.conn.try_lock() {
                Ok(conn) => conn.is_some(),
                // held by a session or probe, so in use
                Err(_) => true,
            },
        }
    }
}

/// Exclusive use of a server's control connection.
pub struct ServerSession<'a> {
    server: &'a ServerInfo,
    conn: MutexGuard<'a, Option<TcpStream>>,
}

impl ServerSession<'_> {
    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.conn.as_mut().ok_or(TransportError::Closed)
    }

    /// Drop the connection after a failed exchange.
    fn reset<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if result.is_err() {
            *self.conn = None;
        }
        result
    }

    /// Ask the server to stream `content`. Returns the CONTENT answer:
    /// a `host:port` or a bare port.
    pub async fn request(&mut self, content: &str) -> Result<String, TransportError> {
        let timeout = self.server.timeout;
        let stream = self.stream()?;
        let result = transport::control_exchange::<_, String>(
            stream,
            &ControlPacket::request(content),
            Flags::CONTENT,
            timeout,
        )
        .await
        .map(|answer| answer.payload);
        self.reset(result)
    }

    /// Acknowledge that the relay for the requested stream is up.
    pub async fn ok(&mut self) -> Result<(), TransportError> {
        let stream = self.stream()?;
        let result = transport::send_control(stream, &ControlPacket::ok()).await;
        self.reset(result)
    }

    pub async fn stop(&mut self, content: &str) -> Result<(), TransportError> {
        let stream = self.stream()?;
        let result = transport::send_control(stream, &ControlPacket::stop(content)).await;
        self.reset(result)
    }
}

impl Drop for ServerSession<'_> {
    fn drop(&mut self) {
        self.server.paused.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(server = %self.server.address, "metrics resumed");
    }
}

/// Periodic PING/PONG probe of one server. Runs until shutdown.
pub async fn monitor(server: Arc<ServerInfo>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {}
        }
        if server.is_paused() {
            tracing::trace!(server = %server.address, "metrics paused, skipping probe");
            continue;
        }
        match server.probe().await {
            Ok(rtt) => tracing::trace!(server = %server.address, rtt_ms = rtt.as_millis() as u64, "probe"),
            Err(e) => tracing::debug!(server = %server.address, error = %e, "probe failed"),
        }
    }
}

/// The servers a rendezvous point fronts, in bootstrap order.
#[derive(Default)]
pub struct ServerRegistry {
    servers: Vec<Arc<ServerInfo>>,
}

impl ServerRegistry {
    pub fn new(addresses: &[SocketAddr], timeout: Duration) -> Self {
        Self {
            servers: addresses
                .iter()
                .map(|a| Arc::new(ServerInfo::new(*a, timeout)))
                .collect(),
        }
    }

    pub fn servers(&self) -> &[Arc<ServerInfo>] {
        &self.servers
    }

    pub fn get(&self, address: SocketAddr) -> Option<Arc<ServerInfo>> {
        self.servers.iter().find(|s| s.address == address).cloned()
    }

    /// Wake every server. Unreachable servers stay registered with an
    /// empty catalog; the monitor retries them.
    pub async fn connect_all(&self) {
        for server in &self.servers {
            if let Err(e) = server.connect().await {
                tracing::warn!(server = %server.address, error = %e, "content server unreachable");
            }
        }
    }

    pub async fn content_exists(&self, content: &str) -> bool {
        for server in &self.servers {
            if server.offers(content).await {
                return true;
            }
        }
        false
    }

    /// Lowest score among the servers offering `content`. First wins ties.
    pub async fn best_server(&self, content: &str) -> Option<Arc<ServerInfo>> {
        let mut best: Option<(f64, &Arc<ServerInfo>)> = None;
        for server in &self.servers {
            if !server.offers(content).await {
                continue;
            }
            let score = server.score().await;
            match best {
                Some((best_score, _)) if best_score <= score => {}
                _ => best = Some((score, server)),
            }
        }
        best.map(|(_, s)| s.clone())
    }

    pub fn who_is_streaming(&self, content: &str) -> Option<Arc<ServerInfo>> {
        self.servers.iter().find(|s| s.is_streaming(content)).cloned()
    }

    pub fn spawn_monitors(&self, interval: Duration, shutdown: &broadcast::Sender<()>) {
        for server in &self.servers {
            tokio::spawn(monitor(server.clone(), interval, shutdown.subscribe()));
        }
    }

    pub async fn snapshot(&self) -> Vec<ServerSnapshot> {
        let mut out = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            out.push(server.snapshot().await);
        }
        out
    }
}
