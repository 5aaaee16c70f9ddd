//! Control listener: accepts TCP connections and feeds each packet to the
//! node's role.
//!
//! DISCOVER conversations stay open for further packets. STREAM and TEARDOWN
//! conversations end after one packet. Anything else closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use mcast_core::wire::{Flags, Packet};

use crate::protocol::{Node, ProtocolError};
use crate::transport::{self, TransportError};

pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown. One task per connection.
    pub async fn serve(self, node: Arc<Node>, mut shutdown: broadcast::Receiver<()>) {
        let local = self.listener.local_addr().ok();
        tracing::info!(addr = ?local, role = ?node.role(), "control listener started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("control listener shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let node = node.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(node, stream, peer).await {
                            match e {
                                ProtocolError::InvariantViolation(_) => {
                                    tracing::error!(%peer, error = %e, "connection task terminated")
                                }
                                _ => tracing::debug!(%peer, error = %e, "connection closed"),
                            }
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    node: Arc<Node>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), ProtocolError> {
    loop {
        let Some(body) = transport::read_frame(&mut stream).await? else {
            return Ok(());
        };
        let packet = Packet::decode(&body).map_err(TransportError::from)?;
        let flags = packet.header.flags;
        tracing::debug!(%peer, %flags, request_id = %packet.request_id(), "packet received");

        if flags.is(Flags::DISCOVER) {
            let reply = node.on_discovery(packet, peer).await?;
            transport::send_packet(&mut stream, &reply).await?;
        } else if flags.is(Flags::STREAM) {
            let reply = node.on_stream(packet, peer).await?;
            transport::send_packet(&mut stream, &reply).await?;
            return Ok(());
        } else if flags.is(Flags::TEARDOWN) {
            return node.on_teardown(packet, peer).await;
        } else {
            return Err(ProtocolError::UnexpectedFlag(flags));
        }
    }
}
