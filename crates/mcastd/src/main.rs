//! mcastd — multicast overlay node daemon.

mod bootstrap;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use mcast_core::bootstrap::NodeDescriptor;
use mcast_core::config::{McastConfig, NodeRole};
use mcast_services::{ControlListener, Node, NodeSettings, OverlayNode, RendezvousPoint};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = McastConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = McastConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        McastConfig::default()
    });

    let advertise = config.advertise_addr().context("invalid node.advertise")?;

    // Who are we
    let descriptor = if config.bootstrap.address.is_empty() {
        NodeDescriptor {
            role: config.node.role,
            self_addr: advertise,
            neighbours: config.node.neighbours.clone(),
        }
    } else {
        bootstrap::get_node(&config.bootstrap.address, &advertise.to_string(), config.io_timeout())
            .await
            .context("bootstrap lookup failed")?
    };
    tracing::info!(
        role = ?descriptor.role,
        self_addr = %descriptor.self_addr,
        neighbours = ?descriptor.neighbours,
        "mcastd starting"
    );

    let settings = NodeSettings {
        self_addr: descriptor.self_addr,
        neighbours: descriptor.neighbours,
        first_port: config.relay.first_port,
        bind_host: config.relay.bind_host,
        io_timeout: config.io_timeout(),
    };

    let listener = ControlListener::bind(config.node.listen)
        .await
        .with_context(|| format!("failed to bind control listener on {}", config.node.listen))?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Role ─────────────────────────────────────────────────────────────────
    let node = Arc::new(match descriptor.role {
        NodeRole::Overlay => Node::Overlay(OverlayNode::new(settings)),
        NodeRole::Rendezvous => {
            let rp = RendezvousPoint::new(settings);
            rp.start(config.metrics_interval(), &shutdown_tx).await;
            Node::Rendezvous(rp)
        }
    });

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = tokio::spawn(listener.serve(node.clone(), shutdown_tx.subscribe()));

    let snapshot_printer = {
        let node = node.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
            loop {
                interval.tick().await;
                let relays = node.state().relays.snapshot().await;
                tracing::info!(count = relays.len(), "relay pool snapshot");
                for relay in &relays {
                    tracing::info!(
                        content = %relay.content,
                        origin = %relay.origin,
                        port = relay.port,
                        downstream = relay.downstream.len(),
                        "  relay"
                    );
                }
            }
        })
    };

    // Status HTTP endpoint
    let api_port = config.api.port;
    if api_port != 0 {
        let state = mcast_api::ApiState {
            node: node.clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = mcast_api::serve(state, api_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = listener_task       => tracing::error!("control listener exited: {:?}", r),
        r = snapshot_printer    => tracing::error!("snapshot printer exited: {:?}", r),
    }

    node.state().relays.stop_all().await;
    tracing::info!("relays stopped");

    Ok(())
}
