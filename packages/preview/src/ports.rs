// ABOUTME: TCP port probing and allocation for managed development servers
// ABOUTME: Walks the preferred list with a double probe, then falls back to an ephemeral port

use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::types::{PreviewError, PreviewResult};

/// Check whether `port` can be bound on the wildcard address.
///
/// The listener is dropped before returning. Any bind failure counts as
/// unavailable.
pub async fn probe(port: u16) -> bool {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) => {
            debug!("Port {} unavailable: {}", port, e);
            false
        }
    }
}

/// Pick a port for a new managed server.
///
/// Preferred ports are tried in order, skipping any in `reserved`. A port is
/// committed only if it probes free twice with `settle` in between. When the
/// whole list is taken the OS is asked for an ephemeral port.
pub async fn allocate(
    preferred: &[u16],
    reserved: &HashSet<u16>,
    settle: Duration,
) -> PreviewResult<u16> {
    for &port in preferred {
        if reserved.contains(&port) {
            continue;
        }

        if !probe(port).await {
            continue;
        }

        tokio::time::sleep(settle).await;

        if probe(port).await {
            debug!("Allocated preferred port {}", port);
            return Ok(port);
        }

        debug!("Port {} was taken during the settle delay", port);
    }

    let port = ephemeral_port().await?;
    info!(
        "All preferred ports are busy, using ephemeral port {}",
        port
    );
    Ok(port)
}

async fn ephemeral_port() -> PreviewResult<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .await
        .map_err(|e| PreviewError::PortExhausted {
            reason: format!("ephemeral bind failed: {}", e),
        })?;

    let port = listener
        .local_addr()
        .map_err(|e| PreviewError::PortExhausted {
            reason: format!("could not read ephemeral port: {}", e),
        })?
        .port();

    Ok(port)
}
