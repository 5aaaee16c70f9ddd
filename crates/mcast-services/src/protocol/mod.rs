//! Node roles and the state they share.
//!
//! Both roles answer the same three conversations (DISCOVER, STREAM,
//! TEARDOWN); they differ in where content comes from. Overlay nodes ask
//! their peers, rendezvous points ask their content servers.

pub mod overlay;
pub mod rendezvous;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use mcast_core::config::NodeRole;
use mcast_core::wire::{Flags, Packet};

use crate::pool::{PoolError, RelayPool};
use crate::records::{PositiveRecord, RecordError, RequestRecord};
use crate::relay::{Relay, RelayError};
use crate::servers::ServerRegistry;
use crate::transport::TransportError;

pub use overlay::OverlayNode;
pub use rendezvous::RendezvousPoint;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("unexpected {0} packet")]
    UnexpectedFlag(Flags),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Settings both roles need at runtime.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub self_addr: SocketAddr,
    pub neighbours: Vec<SocketAddr>,
    pub first_port: u16,
    pub bind_host: IpAddr,
    pub io_timeout: Duration,
}

/// Registries shared by every connection task of one node.
#[derive(Debug)]
pub struct NodeState {
    pub self_addr: SocketAddr,
    pub requests: RequestRecord,
    pub positives: PositiveRecord,
    pub relays: RelayPool,
    pub bind_host: IpAddr,
    pub io_timeout: Duration,
    /// Where each relay's stream comes from, recorded when the relay is built.
    upstreams: DashMap<String, SocketAddr>,
    /// Serialises stream setup and teardown per content name.
    setup: DashMap<String, Arc<Mutex<()>>>,
}

/// What releasing one consumer did to the relay.
#[derive(Debug)]
pub(crate) enum Release {
    NotRelaying,
    UnknownConsumer(SocketAddr),
    Pruned(SocketAddr),
    /// The last consumer left. The relay is stopped and deregistered;
    /// `upstream` is the node that feeds it, if any.
    Collapsed {
        relay: Arc<Relay>,
        upstream: Option<SocketAddr>,
    },
}

impl NodeState {
    pub fn new(settings: &NodeSettings) -> Self {
        Self {
            self_addr: settings.self_addr,
            requests: RequestRecord::new(),
            positives: PositiveRecord::new(),
            relays: RelayPool::new(settings.first_port),
            bind_host: settings.bind_host,
            io_timeout: settings.io_timeout,
            upstreams: DashMap::new(),
            setup: DashMap::new(),
        }
    }

    pub(crate) async fn lock_content(&self, content: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .setup
            .entry(content.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Add the requester to an existing relay. The consumer address is the
    /// requester's host with the relay port, or a fresh port when another
    /// consumer on the same host already holds that address.
    pub(crate) async fn attach(&self, relay: &Relay, peer: SocketAddr) -> Result<SocketAddr, ProtocolError> {
        let mut consumer = SocketAddr::new(peer.ip(), relay.port());
        if relay.contains(consumer).await {
            consumer = SocketAddr::new(peer.ip(), self.relays.next_port()?);
        }
        relay.add(consumer).await?;
        Ok(consumer)
    }

    /// Bind a relay on `origin`, give it the requester as first consumer,
    /// start forwarding and register it. `upstream` is the peer the STREAM
    /// was forwarded to; teardown of the relay goes back there.
    pub(crate) async fn materialize(
        &self,
        content: &str,
        origin: SocketAddr,
        peer: SocketAddr,
        upstream: Option<SocketAddr>,
    ) -> Result<SocketAddr, ProtocolError> {
        let port = self.relays.next_port()?;
        let relay = Arc::new(Relay::bind(content, origin, port)?);
        let consumer = SocketAddr::new(peer.ip(), port);
        relay.add(consumer).await?;
        relay.start()?;
        if let Err(e) = self.relays.insert(relay.clone()) {
            relay.stop().await;
            return Err(e.into());
        }
        if let Some(upstream) = upstream {
            self.upstreams.insert(content.to_string(), upstream);
        }
        tracing::info!(content, %origin, port, %consumer, "relay created");
        Ok(consumer)
    }

    /// Release the consumer a TEARDOWN names. `payload.port` carries the
    /// consumer address; without it the requester host is used.
    pub(crate) async fn release(&self, packet: &Packet, peer: SocketAddr) -> Release {
        let content = packet.content_name();
        let Some(relay) = self.relays.get(content) else {
            return Release::NotRelaying;
        };

        let target = packet
            .payload
            .port
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(peer.ip(), relay.port()));

        let last = relay.downstream_len().await <= 1;
        let Some(removed) = relay.remove(target).await else {
            return Release::UnknownConsumer(target);
        };
        if !last {
            return Release::Pruned(removed);
        }

        relay.stop().await;
        self.relays.remove(content);
        let upstream = self.upstreams.remove(content).map(|(_, addr)| addr);
        Release::Collapsed { relay, upstream }
    }
}

/// A node's role, chosen once at startup.
pub enum Node {
    Overlay(OverlayNode),
    Rendezvous(RendezvousPoint),
}

/// Status view of a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub role: NodeRole,
    pub self_addr: SocketAddr,
    pub neighbours: Vec<SocketAddr>,
    pub handled_requests: usize,
    pub positive_records: usize,
    pub relays: usize,
}

impl Node {
    pub fn role(&self) -> NodeRole {
        match self {
            Node::Overlay(_) => NodeRole::Overlay,
            Node::Rendezvous(_) => NodeRole::Rendezvous,
        }
    }

    pub fn state(&self) -> &NodeState {
        match self {
            Node::Overlay(n) => n.state(),
            Node::Rendezvous(r) => r.state(),
        }
    }

    pub fn neighbours(&self) -> Vec<SocketAddr> {
        match self {
            Node::Overlay(n) => n.neighbours().to_vec(),
            Node::Rendezvous(r) => r.servers().servers().iter().map(|s| s.address()).collect(),
        }
    }

    /// Content servers, for a rendezvous point.
    pub fn servers(&self) -> Option<&ServerRegistry> {
        match self {
            Node::Overlay(_) => None,
            Node::Rendezvous(r) => Some(r.servers()),
        }
    }

    pub fn status(&self) -> NodeStatus {
        let state = self.state();
        NodeStatus {
            role: self.role(),
            self_addr: state.self_addr,
            neighbours: self.neighbours(),
            handled_requests: state.requests.len(),
            positive_records: state.positives.len(),
            relays: state.relays.len(),
        }
    }

    pub async fn on_discovery(&self, packet: Packet, peer: SocketAddr) -> Result<Packet, ProtocolError> {
        match self {
            Node::Overlay(n) => n.on_discovery(packet, peer).await,
            Node::Rendezvous(r) => r.on_discovery(packet, peer).await,
        }
    }

    pub async fn on_stream(&self, packet: Packet, peer: SocketAddr) -> Result<Packet, ProtocolError> {
        match self {
            Node::Overlay(n) => n.on_stream(packet, peer).await,
            Node::Rendezvous(r) => r.on_stream(packet, peer).await,
        }
    }

    pub async fn on_teardown(&self, packet: Packet, peer: SocketAddr) -> Result<(), ProtocolError> {
        match self {
            Node::Overlay(n) => n.on_teardown(packet, peer).await,
            Node::Rendezvous(r) => r.on_teardown(packet, peer).await,
        }
    }
}
