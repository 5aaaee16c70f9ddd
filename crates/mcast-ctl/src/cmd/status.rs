//! Node status, relays, servers and shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    role: String,
    self_addr: String,
    neighbours: Vec<String>,
    handled_requests: usize,
    positive_records: usize,
    relays: usize,
}

#[derive(Deserialize)]
struct RelaysResponse {
    relays: Vec<RelayInfo>,
}

#[derive(Deserialize)]
struct RelayInfo {
    content: String,
    origin: String,
    port: u16,
    downstream: Vec<String>,
}

#[derive(Deserialize)]
struct ServersResponse {
    servers: Vec<ServerInfo>,
}

#[derive(Deserialize)]
struct ServerInfo {
    address: String,
    catalog: Vec<CatalogItem>,
    metrics: MetricsInfo,
    streaming: Vec<String>,
    connected: bool,
}

#[derive(Deserialize)]
struct CatalogItem {
    name: String,
    width: u32,
    height: u32,
    fps: u32,
}

#[derive(Deserialize)]
struct MetricsInfo {
    latency_ms: f64,
    jitter_ms: f64,
    score: f64,
    samples: usize,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  mcast Node Status");
    println!("═══════════════════════════════════════");
    println!("  Role             : {}", resp.role);
    println!("  Address          : {}", resp.self_addr);
    println!("  Handled requests : {}", resp.handled_requests);
    println!("  Positive answers : {}", resp.positive_records);
    println!("  Active relays    : {}", resp.relays);

    if resp.neighbours.is_empty() {
        println!("\n  No neighbours.");
    } else {
        println!("\n  Neighbours:");
        for n in &resp.neighbours {
            println!("    {}", n);
        }
    }

    Ok(())
}

pub async fn cmd_relays(port: u16) -> Result<()> {
    let resp: RelaysResponse = get_json(&format!("{}/relays", base_url(port))).await?;

    if resp.relays.is_empty() {
        println!("No active relays.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Relays ({})", resp.relays.len());
    println!("═══════════════════════════════════════");

    for r in &resp.relays {
        println!("  ┌─ {}", r.content);
        println!("  │  origin     : {}", r.origin);
        println!("  │  port       : {}", r.port);
        match r.downstream.split_last() {
            None => println!("  └─ downstream : none"),
            Some((last, rest)) => {
                for d in rest {
                    println!("  │  downstream : {}", d);
                }
                println!("  └─ downstream : {}", last);
            }
        }
    }

    Ok(())
}

pub async fn cmd_servers(port: u16) -> Result<()> {
    let resp: ServersResponse = get_json(&format!("{}/servers", base_url(port))).await?;

    if resp.servers.is_empty() {
        println!("No content servers.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Content Servers ({})", resp.servers.len());
    println!("═══════════════════════════════════════");

    for s in &resp.servers {
        let state = if s.connected { "connected" } else { "disconnected" };
        println!("  ┌─ {} ({})", s.address, state);
        println!(
            "  │  latency  : {:.2} ms  jitter: {:.2} ms  score: {:.2}  ({} samples)",
            s.metrics.latency_ms, s.metrics.jitter_ms, s.metrics.score, s.metrics.samples
        );
        if !s.streaming.is_empty() {
            println!("  │  streaming: {}", s.streaming.join(", "));
        }
        if s.catalog.is_empty() {
            println!("  └─ catalog  : empty");
        } else {
            println!("  └─ catalog  :");
            for c in &s.catalog {
                println!("       {} ({}x{} @ {} fps)", c.name, c.width, c.height, c.fps);
            }
        }
    }

    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    #[derive(Deserialize)]
    struct ShutdownResponse {
        message: String,
    }

    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
