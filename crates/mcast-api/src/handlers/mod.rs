//! HTTP API handlers: exposes node state as JSON.

pub mod relays;
pub mod servers;
pub mod status;

use std::sync::Arc;

use mcast_services::Node;

#[derive(Clone)]
pub struct ApiState {
    pub node: Arc<Node>,
    /// Signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// Re-export handler functions for use in router setup.
pub use relays::handle_relays;
pub use servers::handle_servers;
pub use status::{handle_shutdown, handle_status};
