//! Rendezvous point: resolves content against its content servers and
//! roots relays at the server's stream.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;

use mcast_core::wire::Packet;

use super::{NodeSettings, NodeState, ProtocolError, Release};
use crate::servers::ServerRegistry;

pub struct RendezvousPoint {
    state: NodeState,
    servers: ServerRegistry,
}

impl RendezvousPoint {
    /// `settings.neighbours` are the content servers.
    pub fn new(settings: NodeSettings) -> Self {
        Self {
            servers: ServerRegistry::new(&settings.neighbours, settings.io_timeout),
            state: NodeState::new(&settings),
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn servers(&self) -> &ServerRegistry {
        &self.servers
    }

    /// Wake every server and start one metrics monitor per server.
    pub async fn start(&self, metrics_interval: Duration, shutdown: &broadcast::Sender<()>) {
        self.servers.connect_all().await;
        self.servers.spawn_monitors(metrics_interval, shutdown);
    }

    /// A CONTENT answer is `host:port`, or a bare port on our bind host.
    fn stream_origin(&self, answer: &str) -> Option<SocketAddr> {
        if let Ok(addr) = answer.parse::<SocketAddr>() {
            return Some(addr);
        }
        answer
            .parse::<u16>()
            .ok()
            .map(|port| SocketAddr::new(self.state.bind_host, port))
    }

    pub async fn on_discovery(&self, packet: Packet, peer: SocketAddr) -> Result<Packet, ProtocolError> {
        let id = packet.request_id();
        let content = packet.content_name();

        if !self.state.requests.try_mark(id) {
            tracing::debug!(request_id = %id, %peer, "duplicate discovery");
            return Ok(Packet::miss(id, content));
        }

        if self.servers.content_exists(content).await {
            tracing::info!(request_id = %id, %content, "content available from servers");
            Ok(Packet::found(id, content, &self.state.self_addr.to_string()))
        } else {
            tracing::info!(request_id = %id, %content, "content not on any server");
            Ok(Packet::miss(id, content))
        }
    }

    pub async fn on_stream(&self, packet: Packet, peer: SocketAddr) -> Result<Packet, ProtocolError> {
        let id = packet.request_id();
        let content = packet.content_name().to_string();
        let _guard = self.state.lock_content(&content).await;

        if let Some(relay) = self.state.relays.get(&content) {
            let consumer = self.state.attach(&relay, peer).await?;
            tracing::info!(request_id = %id, %content, %consumer, "consumer attached to relay");
            return Ok(Packet::port(id, &content, &consumer.to_string()));
        }

        let Some(server) = self.servers.best_server(&content).await else {
            tracing::info!(request_id = %id, %content, "no server offers content");
            return Ok(Packet::miss(id, &content));
        };
        tracing::info!(request_id = %id, %content, server = %server.address(), "selected server");

        let mut session = match server.session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(server = %server.address(), error = %e, "server unreachable");
                return Ok(Packet::miss(id, &content));
            }
        };

        let answer = match session.request(&content).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(server = %server.address(), %content, error = %e, "server gave no stream port");
                return Ok(Packet::miss(id, &content));
            }
        };
        let Some(origin) = self.stream_origin(&answer) else {
            tracing::warn!(server = %server.address(), answer = %answer, "unusable stream address");
            return Ok(Packet::miss(id, &content));
        };

        let consumer = match self.state.materialize(&content, origin, peer, None).await {
            Ok(consumer) => consumer,
            Err(e) => {
                // the server is already sending; tell it to stop
                if let Err(stop_err) = session.stop(&content).await {
                    tracing::debug!(server = %server.address(), error = %stop_err, "could not send STOP");
                }
                return Err(e);
            }
        };

        if let Err(e) = session.ok().await {
            tracing::warn!(server = %server.address(), error = %e, "could not acknowledge stream");
        }
        server.set_streaming(&content);
        drop(session);

        Ok(Packet::port(id, &content, &consumer.to_string()))
    }

    pub async fn on_teardown(&self, packet: Packet, peer: SocketAddr) -> Result<(), ProtocolError> {
        let id = packet.request_id();
        let content = packet.content_name().to_string();
        let _guard = self.state.lock_content(&content).await;

        match self.state.release(&packet, peer).await {
            Release::NotRelaying => {
                tracing::debug!(request_id = %id, %content, "teardown for content not relayed");
                Ok(())
            }
            Release::UnknownConsumer(addr) => {
                tracing::warn!(request_id = %id, %content, consumer = %addr, "teardown for unknown consumer");
                Ok(())
            }
            Release::Pruned(addr) => {
                tracing::info!(request_id = %id, %content, consumer = %addr, "consumer removed");
                Ok(())
            }
            Release::Collapsed { .. } => {
                let server = self.servers.who_is_streaming(&content).ok_or_else(|| {
                    ProtocolError::InvariantViolation(format!("no server marked streaming {content}"))
                })?;
                tracing::info!(%content, server = %server.address(), "last consumer left, stopping server stream");
                match server.session().await {
                    Ok(mut session) => {
                        if let Err(e) = session.stop(&content).await {
                            tracing::warn!(server = %server.address(), error = %e, "could not send STOP");
                        }
                    }
                    Err(e) => tracing::warn!(server = %server.address(), error = %e, "server unreachable for STOP"),
                }
                server.unset_streaming(&content);
                Ok(())
            }
        }
    }
}
