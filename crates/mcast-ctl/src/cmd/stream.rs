//! Client side of the control channel: discover, stream, teardown, play.

use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::process::Command;
use uuid::Uuid;

use mcast_core::wire::{Flags, Packet, RELAY_BUFFER_SIZE};
use mcast_services::transport;

/// Discovery floods the whole overlay, so give it more room than one hop.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(15);

fn parse_node(node: &str) -> Result<SocketAddr> {
    node.parse()
        .with_context(|| format!("node must be host:port, got {node:?}"))
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("invalid request id {id:?}"))
}

async fn discover(node: SocketAddr, content: &str) -> Result<(Uuid, Option<Packet>)> {
    let id = Uuid::new_v4();
    let answer = transport::exchange(node, &Packet::discovery(id, content), CONTROL_TIMEOUT)
        .await
        .with_context(|| format!("discovery at {node} failed"))?;
    Ok((id, answer.is(Flags::FOUND).then_some(answer)))
}

async fn stream(node: SocketAddr, content: &str, id: Uuid) -> Result<SocketAddr> {
    let answer = transport::exchange(node, &Packet::stream(id, content), CONTROL_TIMEOUT)
        .await
        .with_context(|| format!("stream request at {node} failed"))?;
    if !answer.is(Flags::PORT) {
        bail!("{node} refused to stream {content} ({})", answer.header.flags);
    }
    answer
        .payload
        .port
        .parse()
        .with_context(|| format!("{node} sent an unusable address {:?}", answer.payload.port))
}

async fn teardown(node: SocketAddr, content: &str, id: Uuid, consumer: &str) -> Result<()> {
    transport::notify(node, &Packet::teardown(id, content, "", consumer), CONTROL_TIMEOUT)
        .await
        .with_context(|| format!("teardown at {node} failed"))
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_discover(node: &str, content: &str) -> Result<()> {
    let node = parse_node(node)?;
    let (id, found) = discover(node, content).await?;
    match found {
        Some(answer) => println!(
            "FOUND {} via {} ({} hops)",
            content, answer.header.source, answer.header.hops
        ),
        None => println!("MISS {}", content),
    }
    println!("request id: {}", id);
    Ok(())
}

pub async fn cmd_stream(node: &str, content: &str, id: &str) -> Result<()> {
    let consumer = stream(parse_node(node)?, content, parse_id(id)?).await?;
    println!("streaming {} to {}", content, consumer);
    Ok(())
}

pub async fn cmd_teardown(node: &str, content: &str, id: &str, consumer: &str) -> Result<()> {
    teardown(parse_node(node)?, content, parse_id(id)?, consumer).await?;
    println!("teardown sent for {} at {}", content, consumer);
    Ok(())
}

/// Discover, stream, and pipe the datagrams into `ffplay` until it exits
/// or Ctrl-C, then release our relay slot.
pub async fn cmd_play(node: &str, content: &str) -> Result<()> {
    let node = parse_node(node)?;
    let (id, found) = discover(node, content).await?;
    if found.is_none() {
        bail!("{content} not found from {node}");
    }
    let consumer = stream(node, content, id).await?;
    println!("streaming {} to {} (request id {})", content, consumer, id);

    let result = pipe_to_player(consumer.port()).await;

    teardown(node, content, id, &consumer.to_string()).await?;
    println!("teardown sent");
    result
}

async fn pipe_to_player(port: u16) -> Result<()> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .with_context(|| format!("failed to bind udp port {port}"))?;

    let mut player = Command::new("ffplay")
        .args(["-f", "mpegts", "-"])
        .stdin(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to start ffplay")?;
    let mut stdin = player.stdin.take().context("ffplay stdin unavailable")?;

    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping player");
                break;
            }
            status = player.wait() => {
                tracing::info!(status = ?status, "player exited");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => {
                let (n, _) = received.context("udp receive failed")?;
                if let Err(e) = stdin.write_all(&buf[..n]).await {
                    tracing::debug!(error = %e, "player stopped reading");
                    break;
                }
            }
        }
    }

    player.kill().await.ok();
    Ok(())
}
