//! mcast integration tests.
//!
//! Every test builds its own overlay out of real nodes on loopback: each
//! node has a control listener on 127.0.0.1 and a private block of relay
//! ports, so tests can run in parallel.
//!
//!   cargo test --test integration

mod infra;
pub use infra::*;

mod discovery;
mod fanout;
mod rendezvous;
mod streaming;
mod teardown;
