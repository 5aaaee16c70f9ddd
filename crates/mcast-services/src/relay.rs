//! Relay: a UDP duplicator for one content item.
//!
//! Receives datagrams on the origin address and forwards each one to every
//! downstream address. The downstream set can grow and shrink while the
//! forwarding loop runs.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use mcast_core::wire::RELAY_BUFFER_SIZE;

/// Kernel receive buffer requested for relay sockets.
const RECV_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("cannot bind relay origin {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("already streaming to {0}")]
    DuplicateAddress(SocketAddr),
    #[error("relay already started")]
    AlreadyStarted,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Relay {
    content: String,
    origin: SocketAddr,
    /// Port consumers of this relay receive on.
    port: u16,
    downstream: Arc<RwLock<Vec<SocketAddr>>>,
    socket: Mutex<Option<UdpSocket>>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("content", &self.content)
            .field("origin", &self.origin)
            .field("port", &self.port)
            .finish()
    }
}

impl Relay {
    /// Bind the origin socket. Fails immediately if the address is taken
    /// or not local.
    pub fn bind(content: &str, origin: SocketAddr, port: u16) -> Result<Self, RelayError> {
        let bind_err = |source| RelayError::Bind {
            addr: origin,
            source,
        };

        let socket = Socket::new(Domain::for_address(origin), Type::DGRAM, Some(Protocol::UDP))
            .map_err(bind_err)?;
        if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
            tracing::debug!(error = %e, "could not enlarge relay receive buffer");
        }
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&origin.into()).map_err(bind_err)?;

        let socket = UdpSocket::from_std(socket.into()).map_err(bind_err)?;
        let origin = socket.local_addr()?;
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            content: content.to_string(),
            origin,
            port,
            downstream: Arc::new(RwLock::new(Vec::new())),
            socket: Mutex::new(Some(socket)),
            stop_tx,
            task: Mutex::new(None),
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Address the relay receives on.
    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn add(&self, addr: SocketAddr) -> Result<(), RelayError> {
        let mut downstream = self.downstream.write().await;
        if downstream.contains(&addr) {
            return Err(RelayError::DuplicateAddress(addr));
        }
        downstream.push(addr);
        tracing::debug!(content = %self.content, downstream = %addr, "relay target added");
        Ok(())
    }

    /// Remove `addr` exactly, or else the oldest entry on the same host.
    pub async fn remove(&self, addr: SocketAddr) -> Option<SocketAddr> {
        let mut downstream = self.downstream.write().await;
        let idx = downstream
            .iter()
            .position(|a| *a == addr)
            .or_else(|| downstream.iter().position(|a| a.ip() == addr.ip()))?;
        let removed = downstream.remove(idx);
        tracing::debug!(content = %self.content, downstream = %removed, "relay target removed");
        Some(removed)
    }

    pub async fn contains(&self, addr: SocketAddr) -> bool {
        self.downstream.read().await.contains(&addr)
    }

    pub async fn downstream(&self) -> Vec<SocketAddr> {
        self.downstream.read().await.clone()
    }

    pub async fn downstream_len(&self) -> usize {
        self.downstream.read().await.len()
    }

    /// Spawn the forwarding loop.
    pub fn start(&self) -> Result<(), RelayError> {
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(RelayError::AlreadyStarted)?;

        let handle = tokio::spawn(forward_loop(
            self.content.clone(),
            socket,
            self.downstream.clone(),
            self.stop_tx.subscribe(),
        ));

        *self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        tracing::info!(content = %self.content, origin = %self.origin, port = self.port, "relay started");
        Ok(())
    }

    /// Stop forwarding and close the origin socket. Waits for the loop to exit.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(content = %self.content, error = %e, "relay loop ended abnormally");
            }
        }
        // never started: drop the socket here
        self.socket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        tracing::info!(content = %self.content, origin = %self.origin, "relay stopped");
    }
}

async fn forward_loop(
    content: String,
    socket: UdpSocket,
    downstream: Arc<RwLock<Vec<SocketAddr>>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = stop.changed() => break,
            received = socket.recv_from(&mut buf) => {
                let len = match received {
                    Ok((len, _)) => len,
                    Err(e) => {
                        tracing::debug!(content = %content, error = %e, "relay recv failed");
                        continue;
                    }
                };
                let targets = downstream.read().await;
                for target in targets.iter() {
                    if let Err(e) = socket.send_to(&buf[..len], target).await {
                        tracing::debug!(content = %content, target = %target, error = %e, "relay send failed");
                    }
                }
            }
        }
    }
}
