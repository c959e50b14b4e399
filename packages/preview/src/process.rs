// ABOUTME: OS process helpers for spawning, terminating and killing development servers
// ABOUTME: Children get their own process group on Unix so the whole npm tree is signalled

use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use devdock_config::constants;

use crate::types::{PreviewError, PreviewResult, SpawnSpec};

/// Directories prepended to `PATH` so GUI-launched sessions still find node and npm
#[cfg(unix)]
const EXTRA_PATH_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
    "/opt/homebrew/bin",
    "/opt/local/bin",
];

/// Exclusive ownership of a running child, held by its registry entry.
///
/// Dropping the handle (or calling [`ProcessHandle::stop`]) tells the monitor
/// task to terminate the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, stop_tx: oneshot::Sender<()>, monitor: JoinHandle<()>) -> Self {
        Self {
            pid,
            stop_tx: Some(stop_tx),
            monitor: Some(monitor),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the monitor to terminate the child. Returns the monitor task so
    /// callers that need to wait for the exit can do so.
    pub fn stop(mut self) -> Option<JoinHandle<()>> {
        if let Some(tx) = self.stop_tx.take() {
            // Monitor already gone means the child already exited
            let _ = tx.send(());
        }
        self.monitor.take()
    }
}

/// Spawn the child described by `spec`, forced onto `port`.
pub fn spawn_child(spec: &SpawnSpec, port: u16) -> PreviewResult<Child> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env(constants::PORT, port.to_string())
        .env(constants::NEXT_TELEMETRY_DISABLED, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        let current = std::env::var(constants::PATH).unwrap_or_default();
        let mut path = EXTRA_PATH_DIRS.join(":");
        if !current.is_empty() {
            path.push(':');
            path.push_str(&current);
        }
        command.env(constants::PATH, path);
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    command.spawn().map_err(|e| PreviewError::SpawnFailed {
        command: format!(
            "{} {}",
            spec.program.display(),
            spec.args.join(" ")
        ),
        error: e.to_string(),
    })
}

/// Gracefully terminate a managed child and its process group, escalating to
/// a forced kill if it is still alive after `grace`. Returns the exit code.
pub async fn terminate_child(child: &mut Child, grace: Duration) -> Option<i32> {
    let Some(pid) = child.id() else {
        // Already reaped
        return child.wait().await.ok().and_then(|status| status.code());
    };

    signal_group(pid, false).await;

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!("Process {} exited after termination request", pid);
            return status.code();
        }
        Ok(Err(e)) => {
            warn!("Failed waiting for process {}: {}", pid, e);
        }
        Err(_) => {
            warn!(
                "Process {} did not exit within {:?}, forcing kill",
                pid, grace
            );
        }
    }

    signal_group(pid, true).await;
    if let Err(e) = child.kill().await {
        debug!("Direct kill of process {} failed: {}", pid, e);
    }
    child.wait().await.ok().and_then(|status| status.code())
}

#[cfg(unix)]
async fn signal_group(pid: u32, force: bool) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let nix_pid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(nix_pid, signal) {
        debug!(
            "Failed to send {} to process group {}: {}, signalling the process only",
            signal, pid, e
        );
        if let Err(e) = kill(nix_pid, signal) {
            debug!("Failed to send {} to PID {}: {}", signal, pid, e);
        }
    }
}

#[cfg(windows)]
async fn signal_group(pid: u32, force: bool) {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if force {
        args.push("/F");
    }

    match Command::new("taskkill")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) if status.success() => {}
        Ok(status) => debug!("taskkill for PID {} exited with {}", pid, status),
        Err(e) => debug!("Failed to run taskkill for PID {}: {}", pid, e),
    }
}

#[cfg(not(any(unix, windows)))]
async fn signal_group(_pid: u32, _force: bool) {}

/// Kill a process this tool did not spawn.
///
/// Sends a graceful termination signal and escalates to a forced kill only if
/// the OS rejects the first one. Does not wait for the process to exit.
#[cfg(unix)]
pub async fn kill_pid(pid: u32) -> PreviewResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);

    match kill(nix_pid, Signal::SIGTERM) {
        Ok(()) => {
            info!("Sent SIGTERM to process with PID: {}", pid);
            Ok(())
        }
        Err(term_err) => {
            warn!(
                "Failed to send SIGTERM to PID {}: {}, trying SIGKILL",
                pid, term_err
            );
            kill(nix_pid, Signal::SIGKILL).map_err(|kill_err| PreviewError::KillFailed {
                pid,
                error: format!("SIGTERM: {}; SIGKILL: {}", term_err, kill_err),
            })?;
            info!("Sent SIGKILL to process with PID: {}", pid);
            Ok(())
        }
    }
}

#[cfg(windows)]
async fn taskkill(pid: u32, force: bool) -> std::io::Result<std::process::ExitStatus> {
    let pid_arg = pid.to_string();
    let mut cmd = Command::new("taskkill");
    cmd.args(["/PID", pid_arg.as_str()]);
    if force {
        cmd.arg("/F");
    }
    cmd.stdout(Stdio::null()).stderr(Stdio::null()).status().await
}

#[cfg(windows)]
pub async fn kill_pid(pid: u32) -> PreviewResult<()> {
    match taskkill(pid, false).await {
        Ok(status) if status.success() => {
            info!("Requested termination of PID {}", pid);
            Ok(())
        }
        graceful => {
            warn!(
                "Graceful taskkill for PID {} failed ({:?}), forcing",
                pid, graceful
            );
            match taskkill(pid, true).await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(PreviewError::KillFailed {
                    pid,
                    error: format!("taskkill /F exited with {}", status),
                }),
                Err(e) => Err(PreviewError::KillFailed {
                    pid,
                    error: e.to_string(),
                }),
            }
        }
    }
}

#[cfg(not(any(unix, windows)))]
pub async fn kill_pid(pid: u32) -> PreviewResult<()> {
    Err(PreviewError::KillFailed {
        pid,
        error: "process killing is not supported on this platform".to_string(),
    })
}
