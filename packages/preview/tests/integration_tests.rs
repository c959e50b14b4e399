// ABOUTME: End-to-end lifecycle tests running real /bin/sh children through the orchestrator
// ABOUTME: Covers allocation, start/stop/restart, crash reporting, scanning and external kills
#![cfg(unix)]

use async_trait::async_trait;
use devdock_preview::{
    Classification, DevServerStatus, Launcher, LogType, LookupError, PreviewConfig, PreviewError,
    PreviewManager, PreviewResult, ProcessLookup, ProcessOwner, ServerEvent, SpawnSpec,
};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Runs a fixed shell script for every project
struct ShellLauncher {
    script: String,
}

impl ShellLauncher {
    fn new(script: &str) -> Arc<Self> {
        Arc::new(Self {
            script: script.to_string(),
        })
    }
}

impl Launcher for ShellLauncher {
    fn prepare(&self, project_root: &Path) -> PreviewResult<SpawnSpec> {
        Ok(SpawnSpec {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), self.script.clone()],
            cwd: project_root.to_path_buf(),
            env: Vec::new(),
            command: "dev".to_string(),
            project_type: None,
        })
    }
}

/// Lookup answering from a table the test controls
#[derive(Default)]
struct FakeLookup {
    owners: Mutex<HashMap<u16, ProcessOwner>>,
}

impl FakeLookup {
    fn set(&self, port: u16, pid: u32, command: &str) {
        self.owners.lock().unwrap().insert(
            port,
            ProcessOwner {
                pid,
                command: command.to_string(),
            },
        );
    }
}

#[async_trait]
impl ProcessLookup for FakeLookup {
    async fn lookup(&self, port: u16) -> Result<ProcessOwner, LookupError> {
        self.owners
            .lock()
            .unwrap()
            .get(&port)
            .cloned()
            .ok_or(LookupError::NotFound { port })
    }
}

const IDLE: &str = "while :; do sleep 0.05; done";

/// Distinct ports that were free a moment ago
fn free_ports(count: usize) -> Vec<u16> {
    let listeners: Vec<TcpListener> = (0..count)
        .map(|_| TcpListener::bind(("0.0.0.0", 0)).unwrap())
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().unwrap().port())
        .collect()
}

fn test_config(preferred_ports: Vec<u16>, scan_ports: Vec<u16>) -> PreviewConfig {
    PreviewConfig {
        preferred_ports,
        scan_ports,
        port_settle_delay: Duration::from_millis(10),
        restart_delay: Duration::from_millis(50),
        stop_timeout: Duration::from_secs(2),
        rescan_after_kill: Duration::from_secs(60),
        lookup_timeout: Duration::from_secs(1),
        ..PreviewConfig::default()
    }
}

fn setup(script: &str, preferred: Vec<u16>) -> (PreviewManager, TempDir, String) {
    setup_with_lookup(script, preferred, vec![], Arc::new(FakeLookup::default()))
}

fn setup_with_lookup(
    script: &str,
    preferred: Vec<u16>,
    scan: Vec<u16>,
    lookup: Arc<FakeLookup>,
) -> (PreviewManager, TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let project_key = temp_dir.path().display().to_string();
    let manager = PreviewManager::with_components(
        test_config(preferred, scan),
        ShellLauncher::new(script),
        lookup,
    );
    (manager, temp_dir, project_key)
}

async fn wait_for_event<F>(rx: &mut broadcast::Receiver<ServerEvent>, mut matches: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[tokio::test]
async fn test_start_uses_first_free_preferred_port() {
    let ports = free_ports(3);
    let (manager, _dir, key) = setup(IDLE, ports.clone());

    assert_eq!(manager.server_state(&key).await, DevServerStatus::Stopped);

    let info = manager.start_server(&key).await.unwrap();
    assert_eq!(info.port, ports[0]);
    assert_eq!(info.status, DevServerStatus::Running);
    assert!(info.pid.is_some());
    assert_eq!(manager.server_state(&key).await, DevServerStatus::Running);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_start_skips_busy_preferred_port() {
    let ports = free_ports(2);
    let _busy = TcpListener::bind(("0.0.0.0", ports[0])).unwrap();
    let (manager, _dir, key) = setup(IDLE, ports.clone());

    let info = manager.start_server(&key).await.unwrap();
    assert_eq!(info.port, ports[1]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_second_start_is_rejected_without_mutation() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup(IDLE, ports);

    let first = manager.start_server(&key).await.unwrap();
    let result = manager.start_server(&key).await;
    assert!(matches!(result, Err(PreviewError::AlreadyRunning { .. })));

    let current = manager.get_server_status(&key).await.unwrap();
    assert_eq!(current.id, first.id);
    assert_eq!(current.port, first.port);
    assert_eq!(current.started_at, first.started_at);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_starts_only_one_wins() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup(IDLE, ports);

    let (a, b) = tokio::join!(manager.start_server(&key), manager.start_server(&key));
    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    assert_eq!(manager.list_servers().await.len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_stop_then_immediate_start() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup(IDLE, ports);
    let mut events = manager.subscribe();

    let first = manager.start_server(&key).await.unwrap();
    let pid = first.pid.unwrap();

    let stopped = manager.stop_server(&key).await.unwrap();
    assert_eq!(stopped.status, DevServerStatus::Stopping);
    assert_eq!(manager.server_state(&key).await, DevServerStatus::Stopped);

    let second = manager.start_server(&key).await.unwrap();
    assert_ne!(second.id, first.id);

    // The stopped child goes away without a server-closed event
    tokio::time::timeout(Duration::from_secs(5), async {
        while process_alive(pid) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ServerEvent::ServerClosed { .. }));
    }
    assert_eq!(manager.server_state(&key).await, DevServerStatus::Running);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_external_kill_reports_exit_code() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup("trap 'exit 42' TERM; while :; do sleep 0.05; done", ports);
    let mut events = manager.subscribe();

    let info = manager.start_server(&key).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    kill(Pid::from_raw(info.pid.unwrap() as i32), Signal::SIGTERM).unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, ServerEvent::ServerClosed { .. })).await;
    match event {
        ServerEvent::ServerClosed {
            project_key,
            exit_code,
        } => {
            assert_eq!(project_key, key);
            assert_eq!(exit_code, Some(42));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(manager.server_state(&key).await, DevServerStatus::Stopped);
}

#[tokio::test]
async fn test_console_output_is_streamed_and_buffered() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup("echo hello; echo oops >&2; sleep 5", ports);
    let mut events = manager.subscribe();

    manager.start_server(&key).await.unwrap();

    let event = wait_for_event(&mut events, |e| {
        matches!(e, ServerEvent::ConsoleOutput { stream: LogType::Stderr, .. })
    })
    .await;
    if let ServerEvent::ConsoleOutput { text, .. } = event {
        assert_eq!(text, "oops");
    }

    // Give the stdout reader a moment as well
    tokio::time::sleep(Duration::from_millis(200)).await;
    let logs = manager.get_server_logs(&key, None, None).await;
    assert!(logs
        .iter()
        .any(|l| l.log_type == LogType::Stdout && l.message == "hello"));
    assert!(logs.iter().any(|l| l.log_type == LogType::System));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_invalid_utf8_output_does_not_stop_the_reader() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup(
        r"echo before; printf 'bad \377 byte\n'; sleep 0.3; echo after; sleep 30",
        ports,
    );
    let mut events = manager.subscribe();

    manager.start_server(&key).await.unwrap();

    let mut lines = Vec::new();
    wait_for_event(&mut events, |e| match e {
        ServerEvent::ConsoleOutput { text, .. } => {
            lines.push(text.clone());
            text == "after"
        }
        ServerEvent::ServerClosed { .. } => panic!("server closed: {:?}", e),
        _ => false,
    })
    .await;

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "before");
    assert_eq!(lines[1], "bad \u{FFFD} byte");
    assert_eq!(manager.server_state(&key).await, DevServerStatus::Running);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_immediate_exit_still_starts_then_closes() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup("exit 7", ports);
    let mut events = manager.subscribe();

    let info = manager.start_server(&key).await.unwrap();
    assert_eq!(info.status, DevServerStatus::Running);

    let event = wait_for_event(&mut events, |e| matches!(e, ServerEvent::ServerClosed { .. })).await;
    assert!(matches!(
        event,
        ServerEvent::ServerClosed {
            exit_code: Some(7),
            ..
        }
    ));
    assert_eq!(manager.server_state(&key).await, DevServerStatus::Stopped);
}

#[tokio::test]
async fn test_no_console_output_after_server_closed() {
    for _ in 0..3 {
        let ports = free_ports(2);
        let temp_dir = TempDir::new().unwrap();
        let key = temp_dir.path().display().to_string();
        let config = PreviewConfig {
            event_channel_size: 4096,
            ..test_config(ports, vec![])
        };
        let manager = PreviewManager::with_components(
            config,
            ShellLauncher::new("i=0; while [ $i -lt 300 ]; do echo line $i; i=$((i+1)); done; exit 3"),
            Arc::new(FakeLookup::default()),
        );
        let mut events = manager.subscribe();

        manager.start_server(&key).await.unwrap();

        let mut output_lines = 0;
        wait_for_event(&mut events, |e| match e {
            ServerEvent::ConsoleOutput { .. } => {
                output_lines += 1;
                false
            }
            ServerEvent::ServerClosed { exit_code, .. } => {
                assert_eq!(*exit_code, Some(3));
                true
            }
            _ => false,
        })
        .await;
        assert_eq!(output_lines, 300);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut late = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ServerEvent::ConsoleOutput { .. }) {
                late += 1;
            }
        }
        assert_eq!(late, 0);

        // The exit note comes after every line the server printed
        let logs = manager.get_server_logs(&key, None, None).await;
        assert_eq!(logs.last().unwrap().log_type, LogType::System);
    }
}

#[tokio::test]
async fn test_address_in_use_fails_the_start() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup(
        "echo 'Error: listen EADDRINUSE: address already in use :::3000' >&2; sleep 30",
        ports,
    );
    let mut events = manager.subscribe();

    let info = manager.start_server(&key).await.unwrap();
    let pid = info.pid.unwrap();

    let event = wait_for_event(&mut events, |e| matches!(e, ServerEvent::ServerClosed { .. })).await;
    assert!(matches!(
        event,
        ServerEvent::ServerClosed {
            exit_code: Some(1),
            ..
        }
    ));
    assert_eq!(manager.server_state(&key).await, DevServerStatus::Stopped);

    // The failed child is terminated
    tokio::time::timeout(Duration::from_secs(5), async {
        while process_alive(pid) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_restart_replaces_the_process() {
    let ports = free_ports(2);
    let (manager, _dir, key) = setup(IDLE, ports);

    let first = manager.start_server(&key).await.unwrap();
    let second = manager.restart_server(&key).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_ne!(first.pid, second.pid);
    assert_eq!(manager.list_servers().await.len(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_scan_excludes_managed_ports() {
    let ports = free_ports(2);
    let lookup = Arc::new(FakeLookup::default());
    let (manager, _dir, key) =
        setup_with_lookup(IDLE, ports.clone(), ports.clone(), lookup.clone());

    let info = manager.start_server(&key).await.unwrap();
    // Stand in for the dev server binding its port
    let _bound = TcpListener::bind(("0.0.0.0", info.port)).unwrap();
    lookup.set(info.port, info.pid.unwrap(), "node server.js");

    let snapshot = manager.scan_external_servers().await;
    assert!(snapshot.iter().all(|s| s.port != info.port));
    assert!(manager.list_external_servers().await.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_external_server_disappears_between_scans() {
    let port = free_ports(1)[0];
    let lookup = Arc::new(FakeLookup::default());
    let (manager, _dir, _key) = setup_with_lookup(IDLE, vec![], vec![port], lookup.clone());
    let mut events = manager.subscribe();

    let listener = TcpListener::bind(("0.0.0.0", port)).unwrap();
    lookup.set(port, 4242, "node node_modules/.bin/next dev");

    let first = manager.scan_external_servers().await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].pid, 4242);
    assert_eq!(first[0].classification, Classification::DevServer);
    assert_eq!(first[0].framework_name.as_deref(), Some("Next.js"));

    drop(listener);

    let second = manager.scan_external_servers().await;
    assert!(second.is_empty());

    // Every scan publishes a full snapshot
    let updates: Vec<usize> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            ServerEvent::ExternalServersUpdate { servers } => Some(servers.len()),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![1, 0]);
}

#[tokio::test]
async fn test_excluded_processes_are_not_reported() {
    let port = free_ports(1)[0];
    let lookup = Arc::new(FakeLookup::default());
    let (manager, _dir, _key) = setup_with_lookup(IDLE, vec![], vec![port], lookup.clone());

    let _listener = TcpListener::bind(("0.0.0.0", port)).unwrap();
    lookup.set(port, 77, "/Applications/Spotify.app/Contents/MacOS/Spotify");

    assert!(manager.scan_external_servers().await.is_empty());
}

#[tokio::test]
async fn test_kill_external_server() {
    let port = free_ports(1)[0];
    let lookup = Arc::new(FakeLookup::default());
    let (manager, _dir, _key) = setup_with_lookup(IDLE, vec![], vec![port], lookup.clone());

    assert!(matches!(
        manager.kill_external_server(port).await,
        Err(PreviewError::NotFound { .. })
    ));

    let mut foreign = tokio::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let foreign_pid = foreign.id().unwrap();

    let _listener = TcpListener::bind(("0.0.0.0", port)).unwrap();
    lookup.set(port, foreign_pid, "node server.js");
    assert_eq!(manager.scan_external_servers().await.len(), 1);

    let mut events = manager.subscribe();
    manager.kill_external_server(port).await.unwrap();

    // Removed optimistically, before any rescan
    assert!(manager.list_external_servers().await.is_empty());
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ServerEvent::ExternalServersUpdate { .. })
    })
    .await;
    assert!(matches!(event, ServerEvent::ExternalServersUpdate { servers } if servers.is_empty()));

    let status = tokio::time::timeout(Duration::from_secs(5), foreign.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(!status.success());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_terminates_managed_children() {
    let ports = free_ports(3);
    let (manager, _dir_a, key_a) = setup(IDLE, ports);
    let dir_b = TempDir::new().unwrap();
    let key_b = dir_b.path().display().to_string();

    let a = manager.start_server(&key_a).await.unwrap();
    let b = manager.start_server(&key_b).await.unwrap();
    assert_ne!(a.port, b.port);

    manager.shutdown().await;

    assert!(manager.list_servers().await.is_empty());
    for pid in [a.pid.unwrap(), b.pid.unwrap()] {
        assert!(!process_alive(pid), "PID {} survived shutdown", pid);
    }
}
