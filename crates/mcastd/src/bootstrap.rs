//! Startup lookup against the bootstrap service.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::net::lookup_host;

use mcast_core::bootstrap::{BootstrapMessage, NodeDescriptor};
use mcast_services::transport;

/// Ask the bootstrap service at `bootstrap_addr` what the node at
/// `self_hint` is and who its neighbours are.
pub async fn get_node(bootstrap_addr: &str, self_hint: &str, limit: Duration) -> Result<NodeDescriptor> {
    let addr = lookup_host(bootstrap_addr)
        .await
        .with_context(|| format!("failed to resolve bootstrap address {bootstrap_addr}"))?
        .next()
        .ok_or_else(|| anyhow!("bootstrap address {bootstrap_addr} resolved to nothing"))?;

    let mut stream = transport::connect(addr, limit)
        .await
        .with_context(|| format!("bootstrap service unreachable at {addr}"))?;

    let request = BootstrapMessage::Get {
        address: self_hint.to_string(),
    };
    let body = tokio::time::timeout(limit, async {
        transport::write_frame(&mut stream, &request.to_bytes()).await?;
        transport::read_frame(&mut stream).await
    })
    .await
    .context("bootstrap lookup timed out")??
    .ok_or_else(|| anyhow!("bootstrap service closed the connection"))?;

    match BootstrapMessage::from_bytes(&body).context("malformed bootstrap answer")? {
        BootstrapMessage::Send(node) => Ok(node),
        BootstrapMessage::Error(reason) => bail!("bootstrap refused {self_hint}: {reason}"),
        BootstrapMessage::Get { .. } => bail!("bootstrap answered with a request"),
    }
}
