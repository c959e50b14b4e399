// ABOUTME: Platform lookups resolving the PID and command line behind an occupied port
// ABOUTME: lsof/ss/procfs on Unix, netstat/wmic on Windows, behind the ProcessLookup trait

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use sysinfo::{Pid, ProcessRefreshKind, System};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Owner of a listening socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOwner {
    pub pid: u32,
    pub command: String,
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("`{command}` failed: {error}")]
    CommandFailed { command: String, error: String },

    #[error("no process found listening on port {port}")]
    NotFound { port: u16 },

    #[error("could not resolve command line for PID {pid}")]
    NoCommandLine { pid: u32 },

    #[error("lookup for port {port} timed out")]
    Timeout { port: u16 },

    #[error("process lookup is not supported on this platform")]
    Unsupported,
}

/// Resolves which process owns a listening port.
#[async_trait]
pub trait ProcessLookup: Send + Sync {
    async fn lookup(&self, port: u16) -> Result<ProcessOwner, LookupError>;
}

/// Lookup backed by the host's own tools
#[derive(Debug, Default, Clone)]
pub struct SystemLookup;

impl SystemLookup {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLookup for SystemLookup {
    async fn lookup(&self, port: u16) -> Result<ProcessOwner, LookupError> {
        let pid = find_process_on_port(port).await?;
        let command = command_for_pid(pid).await?;
        debug!("Port {} is held by PID {} ({})", port, pid, command);
        Ok(ProcessOwner { pid, command })
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
static SS_PID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"pid=(\d+)").expect("valid regex"));

#[cfg(windows)]
static NETSTAT_LISTEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*TCP\s+\S+:(\d+)\s+\S+\s+LISTENING\s+(\d+)\s*$").expect("valid regex")
});

async fn run_tool(program: &str, args: &[&str]) -> Result<String, LookupError> {
    let command = format!("{} {}", program, args.join(" "));
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| LookupError::CommandFailed {
            command: command.clone(),
            error: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(LookupError::CommandFailed {
            command,
            error: format!("exited with {}", output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// First PID in `lsof -t` output
#[cfg_attr(windows, allow(dead_code))]
fn parse_lsof_pids(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .next()
}

/// First `pid=N` in `ss -tlnp` output (header skipped)
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_ss_pid(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .skip(1)
        .find_map(|line| SS_PID_RE.captures(line))
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(windows)]
fn parse_netstat_pid(stdout: &str, port: u16) -> Option<u32> {
    stdout.lines().find_map(|line| {
        let caps = NETSTAT_LISTEN_RE.captures(line)?;
        let local_port: u16 = caps[1].parse().ok()?;
        if local_port != port {
            return None;
        }
        caps[2].parse().ok()
    })
}

#[cfg(unix)]
async fn find_process_on_port(port: u16) -> Result<u32, LookupError> {
    let lsof = run_tool("lsof", &[&format!("-ti:{}", port), "-sTCP:LISTEN"]).await;
    match lsof {
        Ok(stdout) => {
            if let Some(pid) = parse_lsof_pids(&stdout) {
                return Ok(pid);
            }
        }
        Err(e) => debug!("lsof lookup for port {} failed: {}", port, e),
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(pid) = try_ss_for_port(port).await {
            return Ok(pid);
        }
        if let Some(pid) = try_proc_net_tcp_for_port(port).await {
            return Ok(pid);
        }
    }

    Err(LookupError::NotFound { port })
}

#[cfg(target_os = "linux")]
async fn try_ss_for_port(port: u16) -> Option<u32> {
    let filter = format!("sport = :{}", port);
    let stdout = run_tool("ss", &["-tlnp", &filter]).await.ok()?;
    parse_ss_pid(&stdout)
}

#[cfg(target_os = "linux")]
async fn try_proc_net_tcp_for_port(port: u16) -> Option<u32> {
    tokio::task::spawn_blocking(move || {
        let port_hex = format!("{:04X}", port);

        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            let Ok(content) = std::fs::read_to_string(table) else {
                continue;
            };

            for line in content.lines().skip(1) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 10 {
                    continue;
                }

                // 0A is TCP_LISTEN
                if parts[3] != "0A" {
                    continue;
                }

                let Some((_ip, port_part)) = parts[1].rsplit_once(':') else {
                    continue;
                };
                if port_part != port_hex {
                    continue;
                }

                if let Ok(inode) = parts[9].parse::<u64>() {
                    if let Some(pid) = find_pid_by_inode(inode) {
                        return Some(pid);
                    }
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

#[cfg(target_os = "linux")]
fn find_pid_by_inode(inode: u64) -> Option<u32> {
    let target = format!("socket:[{}]", inode);
    let proc_dir = std::fs::read_dir("/proc").ok()?;

    for entry in proc_dir.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
            continue;
        };

        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                if link.to_string_lossy() == target {
                    return Some(pid);
                }
            }
        }
    }
    None
}

#[cfg(windows)]
async fn find_process_on_port(port: u16) -> Result<u32, LookupError> {
    let stdout = run_tool("netstat", &["-ano", "-p", "TCP"]).await?;
    parse_netstat_pid(&stdout, port).ok_or(LookupError::NotFound { port })
}

#[cfg(not(any(unix, windows)))]
async fn find_process_on_port(_port: u16) -> Result<u32, LookupError> {
    Err(LookupError::Unsupported)
}

/// Full command line from the process table, empty if unavailable
async fn sysinfo_command_line(pid: u32) -> String {
    tokio::task::spawn_blocking(move || {
        let mut system = System::new();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_process_specifics(sys_pid, ProcessRefreshKind::everything());
        system
            .process(sys_pid)
            .map(|process| process.cmd().join(" "))
            .unwrap_or_default()
    })
    .await
    .unwrap_or_default()
}

#[cfg(unix)]
async fn command_for_pid(pid: u32) -> Result<String, LookupError> {
    let command = sysinfo_command_line(pid).await;
    if !command.trim().is_empty() {
        return Ok(command.trim().to_string());
    }

    let pid_arg = pid.to_string();
    for format in ["args=", "comm="] {
        match run_tool("ps", &["-p", &pid_arg, "-o", format]).await {
            Ok(stdout) if !stdout.trim().is_empty() => return Ok(stdout.trim().to_string()),
            Ok(_) => {}
            Err(e) => debug!("ps lookup for PID {} failed: {}", pid, e),
        }
    }

    Err(LookupError::NoCommandLine { pid })
}

#[cfg(windows)]
async fn command_for_pid(pid: u32) -> Result<String, LookupError> {
    let command = sysinfo_command_line(pid).await;
    if !command.trim().is_empty() {
        return Ok(command.trim().to_string());
    }

    let filter = format!("ProcessId={}", pid);
    let stdout = run_tool(
        "wmic",
        &["process", "where", &filter, "get", "CommandLine", "/value"],
    )
    .await?;

    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix("CommandLine="))
        .map(|cmd| cmd.trim().to_string())
        .filter(|cmd| !cmd.is_empty())
        .ok_or(LookupError::NoCommandLine { pid })
}

#[cfg(not(any(unix, windows)))]
async fn command_for_pid(_pid: u32) -> Result<String, LookupError> {
    Err(LookupError::Unsupported)
}
