use colored::*;
use devdock_cli::render;
use devdock_preview::{ExternalProcess, PreviewConfig, PreviewManager, ServerEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

fn print_snapshot(servers: &[ExternalProcess]) {
    if servers.is_empty() {
        println!("{}", "No external dev servers found".yellow());
    } else {
        println!("{}", render::external_table(servers));
    }
}

pub async fn handle_scan(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let manager = PreviewManager::new(PreviewConfig::from_env());
    let servers = manager.scan_external_servers().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&servers)?);
    } else {
        print_snapshot(&servers);
    }

    manager.shutdown().await;
    Ok(())
}

pub async fn handle_watch() -> Result<(), Box<dyn std::error::Error>> {
    let manager = PreviewManager::new(PreviewConfig::from_env());
    let mut events = manager.subscribe();

    if !manager.start_periodic_discovery().await {
        return Err("External server discovery is disabled (DEVDOCK_DISCOVERY_ENABLED)".into());
    }

    println!(
        "{} every {}s, press Ctrl-C to stop",
        "Watching for external dev servers".blue().bold(),
        manager.config().discovery_interval.as_secs()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last: Option<Vec<ExternalProcess>> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                info!("Received Ctrl-C, stopping discovery");
                break;
            }
            event = events.recv() => match event {
                Ok(ServerEvent::ExternalServersUpdate { servers }) => {
                    // Only print when the snapshot changed
                    if last.as_ref() != Some(&servers) {
                        print_snapshot(&servers);
                        last = Some(servers);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} discovery updates", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

pub async fn handle_kill(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let manager = PreviewManager::new(PreviewConfig::from_env());
    let servers = manager.scan_external_servers().await;

    let Some(target) = servers.iter().find(|s| s.port == port) else {
        manager.shutdown().await;
        return Err(format!("No external dev server found on port {}", port).into());
    };
    println!(
        "Killing {} (PID {}) on port {}",
        target.command.bold(),
        target.pid,
        port
    );

    let result = manager.kill_external_server(port).await;
    manager.shutdown().await;
    result?;

    println!("{} Sent termination signal to port {}", "✓".green(), port);
    Ok(())
}
