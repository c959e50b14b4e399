use colored::*;
use devdock_cli::render;
use devdock_preview::{PreviewConfig, PreviewManager, ProjectDetector, ServerEvent};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::project_key;

pub async fn handle_start(
    paths: Vec<PathBuf>,
    discover: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = PreviewManager::new(PreviewConfig::from_env());
    let mut events = manager.subscribe();

    let mut started = Vec::new();
    for path in &paths {
        let result = match project_key(path) {
            Ok(key) => manager.start_server(&key).await.map_err(|e| e.into()),
            Err(e) => Err(e),
        };

        match result {
            Ok(info) => started.push(info),
            Err(e) => eprintln!("{} {}: {}", "✗".red(), path.display(), e),
        }
    }

    if started.is_empty() {
        manager.shutdown().await;
        return Err("No dev servers were started".into());
    }

    println!("{}", render::servers_table(&started));

    if discover {
        manager.start_periodic_discovery().await;
    }

    println!("{}", "Press Ctrl-C to stop all servers".dimmed());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                info!("Received Ctrl-C, stopping dev servers");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", render::format_event(&event));
                    if matches!(event, ServerEvent::ServerClosed { .. })
                        && manager.list_servers().await.is_empty()
                    {
                        println!("{}", "All dev servers have exited".yellow());
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Output is coming in too fast, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

pub fn handle_detect(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let key = project_key(&path)?;

    let Some(project_type) = ProjectDetector::detect_project_type(&key) else {
        return Err(format!("Unknown project type: {}", key).into());
    };

    println!("{} {}", "Project:".bold(), key);
    println!(
        "{} {} ({})",
        "Type:".bold(),
        project_type.framework_name(),
        project_type
    );
    println!(
        "{} npm run {}",
        "Start command:".bold(),
        ProjectDetector::start_command(project_type)
    );
    Ok(())
}
