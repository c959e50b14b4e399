// ABOUTME: Terminal rendering for managed servers, external servers and orchestrator events
// ABOUTME: Builds comfy-table tables and colored single-line event messages

use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use devdock_preview::{ExternalProcess, LogType, ServerEvent, ServerInfo};
use std::path::Path;

/// Short name for a project key: the last path component
pub fn project_label(project_key: &str) -> String {
    Path::new(project_key)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| project_key.to_string())
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn servers_table(servers: &[ServerInfo]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Project", "Port", "URL", "PID", "Command", "Framework", "Status"]);

    for server in servers {
        table.add_row(vec![
            project_label(&server.project_key),
            server.port.to_string(),
            server.preview_url(),
            server
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            server.command.clone(),
            server
                .framework_name
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            server.status.as_str().to_string(),
        ]);
    }

    table
}

pub fn external_table(servers: &[ExternalProcess]) -> Table {
    let mut table = new_table();
    table.set_header(vec!["Port", "PID", "Framework", "Command"]);

    for server in servers {
        table.add_row(vec![
            server.port.to_string(),
            server.pid.to_string(),
            server
                .framework_name
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            server.command.clone(),
        ]);
    }

    table
}

/// One printable line for an event
pub fn format_event(event: &ServerEvent) -> String {
    match event {
        ServerEvent::ConsoleOutput {
            project_key,
            text,
            stream,
        } => {
            let label = format!("[{}]", project_label(project_key));
            match stream {
                LogType::Stderr => format!("{} {}", label.red(), text),
                LogType::Stdout | LogType::System => format!("{} {}", label.cyan(), text),
            }
        }
        ServerEvent::ServerClosed {
            project_key,
            exit_code,
        } => {
            let code = exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            format!(
                "{} {} exited ({})",
                "■".yellow(),
                project_label(project_key).bold(),
                code
            )
        }
        ServerEvent::ExternalServersUpdate { servers } => format!(
            "{} {} external server(s) found",
            "↻".blue(),
            servers.len()
        ),
    }
}
