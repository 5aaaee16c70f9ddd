//! Control-channel framing.
//!
//! Every message on a control connection is `{len: u32be, body}`. Overlay
//! packets and server-control packets share the same framing; only the body
//! encoding differs.

use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mcast_core::control::ControlPacket;
use mcast_core::wire::{Flags, Packet, WireError, MAX_FRAME};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Option<Vec<u8>>, TransportError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> Result<(), TransportError> {
    if body.len() > MAX_FRAME {
        return Err(TransportError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    stream.write_all(&frame).await?;
    Ok(())
}

/// Read one frame and require one to be there.
async fn read_required(stream: &mut TcpStream) -> Result<Vec<u8>, TransportError> {
    read_frame(stream).await?.ok_or(TransportError::Closed)
}

async fn bounded<F, T>(limit: Duration, fut: F) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(limit))?
}

pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream, TransportError> {
    bounded(limit, async { Ok::<_, TransportError>(TcpStream::connect(addr).await?) }).await
}

// ── Overlay packets ───────────────────────────────────────────────────────────

pub async fn send_packet(stream: &mut TcpStream, packet: &Packet) -> Result<(), TransportError> {
    write_frame(stream, &packet.encode()?).await
}

pub async fn recv_packet(stream: &mut TcpStream) -> Result<Packet, TransportError> {
    Ok(Packet::decode(&read_required(stream).await?)?)
}

/// Open a transient connection, send `packet`, read exactly one answer.
/// The whole exchange is bounded by `limit`.
pub async fn exchange(
    addr: SocketAddr,
    packet: &Packet,
    limit: Duration,
) -> Result<Packet, TransportError> {
    bounded(limit, async {
        let mut stream = TcpStream::connect(addr).await?;
        send_packet(&mut stream, packet).await?;
        recv_packet(&mut stream).await
    })
    .await
}

/// Open a transient connection, send `packet` and close without waiting.
pub async fn notify(addr: SocketAddr, packet: &Packet, limit: Duration) -> Result<(), TransportError> {
    bounded(limit, async {
        let mut stream = TcpStream::connect(addr).await?;
        send_packet(&mut stream, packet).await?;
        stream.shutdown().await?;
        Ok::<_, TransportError>(())
    })
    .await
}

// ── Server-control packets ────────────────────────────────────────────────────

pub async fn send_control<T: Serialize>(
    stream: &mut TcpStream,
    packet: &ControlPacket<T>,
) -> Result<(), TransportError> {
    write_frame(stream, &packet.encode()?).await
}

/// Read one control packet that must carry exactly `expected`.
pub async fn recv_control<T: DeserializeOwned>(
    stream: &mut TcpStream,
    expected: Flags,
) -> Result<ControlPacket<T>, TransportError> {
    let body = read_required(stream).await?;
    Ok(ControlPacket::decode_expecting(&body, expected)?)
}

/// Request/response on a long-lived server connection, bounded by `limit`.
pub async fn control_exchange<T: Serialize, U: DeserializeOwned>(
    stream: &mut TcpStream,
    packet: &ControlPacket<T>,
    expected: Flags,
    limit: Duration,
) -> Result<ControlPacket<U>, TransportError> {
    bounded(limit, async {
        send_control(stream, packet).await?;
        recv_control(stream, expected).await
    })
    .await
}
