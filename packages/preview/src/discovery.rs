// ABOUTME: Discovery of externally launched development servers on the scan port range
// ABOUTME: Probes ports, resolves owners concurrently with a timeout and classifies them

use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::classifier::{detect_framework_from_command, is_likely_dev_server};
use crate::lookup::{LookupError, ProcessLookup};
use crate::manager::PreviewManager;
use crate::ports::probe;
use crate::types::{Classification, ExternalProcess, PreviewError, PreviewResult};

/// Run one scan cycle over `ports`.
///
/// Ports in `managed` are never probed. Free ports, excluded processes and
/// failed lookups are skipped; a failure on one port never affects another.
/// The result is ordered like `ports`.
pub async fn scan_ports(
    ports: &[u16],
    managed: &HashSet<u16>,
    lookup: &dyn ProcessLookup,
    lookup_timeout: Duration,
) -> Vec<ExternalProcess> {
    let candidates: Vec<u16> = ports
        .iter()
        .copied()
        .filter(|port| !managed.contains(port))
        .collect();

    debug!(
        "Scanning {} ports for external servers ({} managed ports skipped)",
        candidates.len(),
        ports.len() - candidates.len()
    );

    let results = join_all(
        candidates
            .iter()
            .map(|&port| discover_server_on_port(port, lookup, lookup_timeout)),
    )
    .await;

    let mut discovered = Vec::new();
    for result in results {
        match result {
            Ok(Some(server)) => discovered.push(server),
            Ok(None) => {}
            Err(e) => debug!("Skipping port: {}", e),
        }
    }

    debug!("Discovered {} external servers", discovered.len());
    discovered
}

/// Inspect a single port. `Ok(None)` means free or not a dev server.
async fn discover_server_on_port(
    port: u16,
    lookup: &dyn ProcessLookup,
    lookup_timeout: Duration,
) -> PreviewResult<Option<ExternalProcess>> {
    if probe(port).await {
        return Ok(None);
    }

    let owner = tokio::time::timeout(lookup_timeout, lookup.lookup(port))
        .await
        .unwrap_or(Err(LookupError::Timeout { port }))
        .map_err(|e| PreviewError::ProcessLookupFailed {
            port,
            reason: e.to_string(),
        })?;

    let classification = is_likely_dev_server(&owner.command);
    if classification == Classification::Excluded {
        debug!(
            "Process {} on port {} doesn't look like a dev server: {}",
            owner.pid, port, owner.command
        );
        return Ok(None);
    }

    debug!(
        "Discovered server on port {}: PID={}, command={}",
        port, owner.pid, owner.command
    );

    Ok(Some(ExternalProcess {
        port,
        pid: owner.pid,
        framework_name: detect_framework_from_command(&owner.command),
        command: owner.command,
        classification,
    }))
}

/// Spawn the repeating scan task.
///
/// The first scan runs immediately. Ticks missed while a slow scan is running
/// are skipped rather than bunched up. The task ends when `shutdown` flips to
/// `true` or its sender is dropped.
pub fn spawn_discovery_task(
    manager: PreviewManager,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!(
        "Starting periodic external server discovery task (interval: {} seconds)",
        period.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Running periodic external server discovery");
                    manager.scan_external_servers().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Periodic discovery task stopped");
    })
}
