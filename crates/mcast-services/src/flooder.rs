//! Flooder: concurrent fan-out of a discovery to neighbours.
//!
//! Every eligible neighbour gets its own task and transient connection.
//! The first FOUND wins; MISS answers, failures and late answers are dropped.
//! When every attempt has finished without a FOUND the flood reports nothing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;

use mcast_core::wire::{Flags, Packet};

use crate::transport;

#[derive(Debug, Clone)]
pub struct Flooder {
    self_addr: SocketAddr,
    neighbours: Vec<SocketAddr>,
    timeout: Duration,
}

/// Who sent `packet`: its `source` when that parses, else the connection peer.
pub fn sender_of(packet: &Packet, peer: SocketAddr) -> SocketAddr {
    packet.header.source.parse().unwrap_or(peer)
}

impl Flooder {
    pub fn new(self_addr: SocketAddr, neighbours: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self {
            self_addr,
            neighbours,
            timeout,
        }
    }

    pub fn neighbours(&self) -> &[SocketAddr] {
        &self.neighbours
    }

    /// Neighbours other than `sender`.
    pub fn eligible(&self, sender: Option<SocketAddr>) -> Vec<SocketAddr> {
        self.neighbours
            .iter()
            .copied()
            .filter(|n| Some(*n) != sender)
            .collect()
    }

    /// Flood `packet` to every neighbour except `sender`.
    ///
    /// The copy sent out carries `hops + 1` and this node as `source`.
    /// Returns the first FOUND answer, if any.
    pub async fn flood(&self, packet: &Packet, sender: Option<SocketAddr>) -> Option<Packet> {
        let targets = self.eligible(sender);
        if targets.is_empty() {
            return None;
        }

        let mut outgoing = packet.clone();
        outgoing.header.hops += 1;
        outgoing.header.source = self.self_addr.to_string();

        let request_id = packet.request_id();
        let (tx, mut rx) = mpsc::channel::<(SocketAddr, Packet)>(targets.len());

        for neighbour in targets {
            let tx = tx.clone();
            let outgoing = outgoing.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                match transport::exchange(neighbour, &outgoing, timeout).await {
                    Ok(answer) => {
                        // receiver gone means someone already won
                        let _ = tx.send((neighbour, answer)).await;
                    }
                    Err(e) => {
                        tracing::debug!(%request_id, %neighbour, error = %e, "flood attempt failed");
                    }
                }
            });
        }
        // the channel closes once every attempt has dropped its sender
        drop(tx);

        while let Some((neighbour, answer)) = rx.recv().await {
            if !answer.is(Flags::FOUND) || answer.request_id() != request_id {
                tracing::debug!(%request_id, %neighbour, flags = %answer.header.flags, "flood answer discarded");
                continue;
            }
            if answer.header.source.parse::<SocketAddr>().is_err() {
                tracing::warn!(%request_id, %neighbour, source = %answer.header.source, "FOUND with unusable source");
                continue;
            }
            tracing::debug!(%request_id, %neighbour, hops = answer.header.hops, "flood resolved");
            return Some(answer);
        }

        tracing::debug!(%request_id, "flood exhausted without a source");
        None
    }
}
