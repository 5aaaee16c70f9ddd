//! mcast-services: the overlay machinery shared by the daemon and tests:
//! framing, registries, relays, flooding, server metrics and the two node roles.

pub mod flooder;
pub mod listener;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod records;
pub mod relay;
pub mod servers;
pub mod transport;

pub use flooder::Flooder;
pub use listener::ControlListener;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use pool::{PoolError, RelayPool, RelaySnapshot};
pub use protocol::{Node, NodeSettings, NodeState, NodeStatus, OverlayNode, ProtocolError, RendezvousPoint};
pub use records::{PositiveRecord, RecordError, RequestRecord};
pub use relay::{Relay, RelayError};
pub use servers::{ServerInfo, ServerRegistry, ServerSession, ServerSnapshot};
pub use transport::TransportError;
