//! Overlay node: finds content by flooding its peers and builds relays
//! hop by hop along the path the first FOUND took.

use std::net::SocketAddr;

use mcast_core::wire::{Flags, Packet};

use super::{NodeSettings, NodeState, ProtocolError, Release};
use crate::flooder::{self, Flooder};
use crate::transport;

pub struct OverlayNode {
    state: NodeState,
    flooder: Flooder,
}

impl OverlayNode {
    pub fn new(settings: NodeSettings) -> Self {
        let flooder = Flooder::new(
            settings.self_addr,
            settings.neighbours.clone(),
            settings.io_timeout,
        );
        Self {
            state: NodeState::new(&settings),
            flooder,
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn neighbours(&self) -> &[SocketAddr] {
        self.flooder.neighbours()
    }

    pub async fn on_discovery(&self, packet: Packet, peer: SocketAddr) -> Result<Packet, ProtocolError> {
        let id = packet.request_id();
        let content = packet.content_name().to_string();
        let self_addr = self.state.self_addr.to_string();

        if !self.state.requests.try_mark(id) {
            tracing::debug!(request_id = %id, %peer, "duplicate discovery");
            return Ok(Packet::miss(id, &content));
        }

        if self.state.relays.is_streaming(&content) {
            tracing::debug!(request_id = %id, %content, "already relaying, answering FOUND");
            return Ok(Packet::found(id, &content, &self_addr));
        }

        let sender = flooder::sender_of(&packet, peer);
        if self.flooder.eligible(Some(sender)).is_empty() {
            tracing::debug!(request_id = %id, %content, "no neighbours to flood");
            return Ok(Packet::miss(id, &content));
        }

        let Some(mut answer) = self.flooder.flood(&packet, Some(sender)).await else {
            tracing::info!(request_id = %id, %content, "content not found");
            return Ok(Packet::miss(id, &content));
        };

        // flooder only returns FOUND answers with a parseable source
        let source: SocketAddr = answer
            .header
            .source
            .parse()
            .map_err(|_| ProtocolError::InvariantViolation(format!("FOUND source {:?}", answer.header.source)))?;
        if let Err(e) = self.state.positives.set(id, source) {
            tracing::warn!(request_id = %id, error = %e, "keeping earlier positive answer");
        }
        tracing::info!(request_id = %id, %content, %source, hops = answer.header.hops, "content found");

        answer.header.source = self_addr;
        Ok(answer)
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

        let Some(upstream) = self.state.positives.get(&id) else {
            tracing::info!(request_id = %id, %content, "no positive answer for stream");
            return Ok(Packet::miss(id, &content));
        };

        let mut forward = Packet::stream(id, &content);
        forward.header.source = self.state.self_addr.to_string();
        forward.header.hops = packet.header.hops + 1;

        let answer = match transport::exchange(upstream, &forward, self.state.io_timeout).await {
            Ok(answer) if answer.is(Flags::PORT) => answer,
            Ok(answer) => {
                tracing::info!(request_id = %id, %upstream, flags = %answer.header.flags, "upstream refused stream");
                return Ok(Packet::miss(id, &content));
            }
            Err(e) => {
                tracing::warn!(request_id = %id, %upstream, error = %e, "upstream unreachable");
                return Ok(Packet::miss(id, &content));
            }
        };

        let Ok(origin) = answer.payload.port.parse::<SocketAddr>() else {
            tracing::warn!(request_id = %id, port = %answer.payload.port, "upstream sent unusable address");
            return Ok(Packet::miss(id, &content));
        };

        let consumer = self.state.materialize(&content, origin, peer, Some(upstream)).await?;
        Ok(Packet::port(id, &content, &consumer.to_string()))
    }

    pub async fn on_teardown(&self, packet: Packet, peer: SocketAddr) -> Result<(), ProtocolError> {
        let id = packet.request_id();
        let content = packet.content_name().to_string();
        let _guard = self.state.lock_content(&content).await;

        let (relay, upstream) = match self.state.release(&packet, peer).await {
            Release::NotRelaying => {
                tracing::debug!(request_id = %id, %content, "teardown for content not relayed");
                return Ok(());
            }
            Release::UnknownConsumer(addr) => {
                tracing::warn!(request_id = %id, %content, consumer = %addr, "teardown for unknown consumer");
                return Ok(());
            }
            Release::Pruned(addr) => {
                tracing::info!(request_id = %id, %content, consumer = %addr, "consumer removed");
                return Ok(());
            }
            Release::Collapsed { relay, upstream } => (relay, upstream),
        };

        // the branch belongs to whoever built it, not to this teardown's request id
        let upstream = upstream.ok_or_else(|| {
            ProtocolError::InvariantViolation(format!("relay for {content} has no recorded upstream"))
        })?;

        tracing::info!(request_id = %id, %content, %upstream, "last consumer left, collapsing branch");
        let next = Packet::teardown(
            id,
            &content,
            &self.state.self_addr.to_string(),
            &relay.origin().to_string(),
        );
        if let Err(e) = transport::notify(upstream, &next, self.state.io_timeout).await {
            tracing::warn!(request_id = %id, %upstream, error = %e, "could not forward teardown");
        }
        Ok(())
    }
}
