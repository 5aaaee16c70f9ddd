//! Bootstrap lookup messages.
//!
//! The bootstrap service tells a starting node what it is and who its
//! neighbours are. It is an external service; only the messages live here.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::config::NodeRole;

/// What the bootstrap service knows about one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(rename = "type")]
    pub role: NodeRole,
    /// Address this node listens on and advertises to others.
    #[serde(rename = "self")]
    pub self_addr: SocketAddr,
    /// Peer nodes for an overlay node, content servers for a rendezvous point.
    pub neighbours: Vec<SocketAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum BootstrapMessage {
    /// Ask for the descriptor of the node reachable at `address`.
    Get { address: String },
    Send(NodeDescriptor),
    Error(String),
}

impl BootstrapMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        // A map of plain strings and addresses always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
