//! mcast-core: wire format, control messages and configuration.
//! All other mcast crates depend on this one.

pub mod bootstrap;
pub mod config;
pub mod control;
pub mod wire;

pub use control::{CatalogEntry, ControlPacket};
pub use wire::{Flags, Packet, WireError};
