//! Relay pool: the relays a node currently runs, one per content name,
//! and the counter that hands out their ports.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::relay::Relay;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("relay port range exhausted")]
    PortsExhausted,
    #[error("already relaying {0}")]
    AlreadyRelaying(String),
}

/// Status view of one relay.
#[derive(Debug, Clone, Serialize)]
pub struct RelaySnapshot {
    pub content: String,
    pub origin: SocketAddr,
    pub port: u16,
    pub downstream: Vec<SocketAddr>,
}

#[derive(Debug)]
pub struct RelayPool {
    relays: DashMap<String, Arc<Relay>>,
    next_port: AtomicU32,
}

impl RelayPool {
    pub fn new(first_port: u16) -> Self {
        Self {
            relays: DashMap::new(),
            next_port: AtomicU32::new(first_port as u32),
        }
    }

    /// Allocate a relay port. Ports are never handed out twice.
    pub fn next_port(&self) -> Result<u16, PoolError> {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        u16::try_from(port).map_err(|_| PoolError::PortsExhausted)
    }

    /// Register `relay` under its content name. A content has at most one relay.
    pub fn insert(&self, relay: Arc<Relay>) -> Result<(), PoolError> {
        match self.relays.entry(relay.content().to_string()) {
            Entry::Occupied(e) => Err(PoolError::AlreadyRelaying(e.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(relay);
                Ok(())
            }
        }
    }

    pub fn get(&self, content: &str) -> Option<Arc<Relay>> {
        self.relays.get(content).map(|r| r.value().clone())
    }

    pub fn remove(&self, content: &str) -> Option<Arc<Relay>> {
        self.relays.remove(content).map(|(_, r)| r)
    }

    pub fn is_streaming(&self, content: &str) -> bool {
        self.relays.contains_key(content)
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<RelaySnapshot> {
        // collect first so no map shard lock is held across an await
        let relays: Vec<Arc<Relay>> = self.relays.iter().map(|r| r.value().clone()).collect();
        let mut out = Vec::with_capacity(relays.len());
        for relay in relays {
            out.push(RelaySnapshot {
                content: relay.content().to_string(),
                origin: relay.origin(),
                port: relay.port(),
                downstream: relay.downstream().await,
            });
        }
        out.sort_by(|a, b| a.content.cmp(&b.content));
        out
    }

    /// Stop every relay. Used on shutdown.
    pub async fn stop_all(&self) {
        let contents: Vec<String> = self.relays.iter().map(|r| r.key().clone()).collect();
        for content in contents {
            if let Some(relay) = self.remove(&content) {
                relay.stop().await;
            }
        }
    }
}
