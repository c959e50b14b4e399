use crate::config::PreviewConfig;
use crate::discovery;
use crate::launcher::{Launcher, NpmLauncher};
use crate::lookup::{ProcessLookup, SystemLookup};
use crate::ports;
use crate::process::{self, ProcessHandle};
use crate::registry::{ManagedServer, ProcessRegistry};
use crate::types::*;
use crate::validation::validate_project_key;
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rescan delay after a kill attempt the OS rejected
const RESCAN_AFTER_FAILED_KILL: Duration = Duration::from_secs(1);

/// How long an exited child's pipes may stay open (held by grandchildren)
/// before its output readers are abandoned
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Process & port orchestrator.
///
/// Owns the registry of spawned servers and the snapshot of external ones.
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct PreviewManager {
    config: Arc<PreviewConfig>,
    registry: Arc<ProcessRegistry>,
    external_servers: Arc<RwLock<BTreeMap<u16, ExternalProcess>>>,
    server_logs: Arc<RwLock<HashMap<String, VecDeque<DevServerLog>>>>,
    launcher: Arc<dyn Launcher>,
    lookup: Arc<dyn ProcessLookup>,
    event_tx: broadcast::Sender<ServerEvent>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    discovery_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for PreviewManager {
    fn default() -> Self {
        Self::new(PreviewConfig::default())
    }
}

impl PreviewManager {
    /// Create a manager that launches npm projects and resolves ports with
    /// the host's own tools.
    pub fn new(config: PreviewConfig) -> Self {
        Self::with_components(
            config,
            Arc::new(NpmLauncher::new()),
            Arc::new(SystemLookup::new()),
        )
    }

    /// Create a manager with a custom launcher and process lookup.
    pub fn with_components(
        config: PreviewConfig,
        launcher: Arc<dyn Launcher>,
        lookup: Arc<dyn ProcessLookup>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_size);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            registry: Arc::new(ProcessRegistry::new()),
            external_servers: Arc::new(RwLock::new(BTreeMap::new())),
            server_logs: Arc::new(RwLock::new(HashMap::new())),
            launcher,
            lookup,
            event_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            discovery_task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Subscribe to lifecycle and discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast_event(&self, event: ServerEvent) {
        if let Err(e) = self.event_tx.send(event) {
            // No receivers is the normal case for headless use
            if self.event_tx.receiver_count() > 0 {
                warn!("Failed to broadcast server event: {}", e);
            }
        }
    }

    /// Add a log entry for a project
    async fn add_log(&self, project_key: &str, log_type: LogType, message: String) {
        let log_entry = DevServerLog {
            timestamp: Utc::now(),
            log_type,
            message,
        };

        let mut logs = self.server_logs.write().await;
        let project_logs = logs.entry(project_key.to_string()).or_default();

        project_logs.push_back(log_entry);

        while project_logs.len() > self.config.log_buffer_lines {
            project_logs.pop_front();
        }
    }

    /// Get logs for a development server.
    ///
    /// Entries are filtered to those newer than `since` and capped to the
    /// most recent `limit` entries. Unknown projects yield an empty list.
    pub async fn get_server_logs(
        &self,
        project_key: &str,
        since: Option<chrono::DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<DevServerLog> {
        let logs = self.server_logs.read().await;

        let Some(project_logs) = logs.get(project_key) else {
            return Vec::new();
        };

        let mut filtered_logs: Vec<DevServerLog> = match since {
            Some(since_time) => project_logs
                .iter()
                .filter(|log| log.timestamp > since_time)
                .cloned()
                .collect(),
            None => project_logs.iter().cloned().collect(),
        };

        if let Some(max_count) = limit {
            if filtered_logs.len() > max_count {
                filtered_logs.drain(..filtered_logs.len() - max_count);
            }
        }

        filtered_logs
    }

    /// Clear all logs for a project.
    pub async fn clear_server_logs(&self, project_key: &str) {
        let mut logs = self.server_logs.write().await;
        logs.remove(project_key);
        info!("Cleared logs for project: {}", project_key);
    }

    /// Start a development server for a project.
    ///
    /// The project key is the absolute project path. The launcher decides what
    /// to run, a port is allocated from the preferred list and handed to the
    /// child through `PORT`. The server counts as running as soon as the
    /// process exists; readiness is not observed.
    ///
    /// # Errors
    ///
    /// * `PreviewError::InvalidProjectKey` - The key is not a clean absolute path
    /// * `PreviewError::AlreadyRunning` - The project already has a server
    /// * `PreviewError::UnknownProjectType` - Nothing runnable was detected
    /// * `PreviewError::PortExhausted` - Not even an ephemeral port was available
    /// * `PreviewError::SpawnFailed` - The process could not be started
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use devdock_preview::{PreviewConfig, PreviewManager};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let manager = PreviewManager::new(PreviewConfig::from_env());
    ///
    ///     match manager.start_server("/home/me/my-app").await {
    ///         Ok(info) => println!("Server started at {}", info.preview_url()),
    ///         Err(e) => eprintln!("Failed to start server: {}", e),
    ///     }
    /// }
    /// ```
    pub async fn start_server(&self, project_key: &str) -> PreviewResult<ServerInfo> {
        validate_project_key(project_key)?;
        info!("Starting dev server for: {}", project_key);

        if self.registry.contains(project_key).await {
            return Err(PreviewError::AlreadyRunning {
                project_key: project_key.to_string(),
            });
        }

        let spec = self.launcher.prepare(Path::new(project_key))?;

        let reserved = self.registry.ports().await;
        let port = ports::allocate(
            &self.config.preferred_ports,
            &reserved,
            self.config.port_settle_delay,
        )
        .await?;

        let server = ManagedServer::new(
            project_key.to_string(),
            port,
            spec.command.clone(),
            spec.project_type.map(|t| t.framework_name().to_string()),
        );
        let id = server.id;

        if self.registry.try_insert(server).await.is_err() {
            info!("Server already running for project: {}", project_key);
            return Err(PreviewError::AlreadyRunning {
                project_key: project_key.to_string(),
            });
        }

        // A port we just probed free cannot still belong to an external server
        if self.external_servers.write().await.remove(&port).is_some() {
            self.publish_external_servers().await;
        }

        self.add_log(
            project_key,
            LogType::System,
            format!(
                "Starting `{}` on port {} in {}",
                spec.command,
                port,
                spec.cwd.display()
            ),
        )
        .await;

        let mut child = match process::spawn_child(&spec, port) {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn dev server for {}: {}", project_key, e);
                self.registry.remove_if_id(project_key, id).await;
                self.add_log(project_key, LogType::System, e.to_string()).await;
                return Err(e);
            }
        };

        let pid = child.id();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_output_reader(
                project_key.to_string(),
                id,
                stdout,
                LogType::Stdout,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_output_reader(
                project_key.to_string(),
                id,
                stderr,
                LogType::Stderr,
            ));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let (attached_tx, attached_rx) = oneshot::channel();
        let monitor = tokio::spawn(self.clone().monitor_child(
            project_key.to_string(),
            id,
            child,
            readers,
            stop_rx,
            attached_rx,
        ));
        let handle = ProcessHandle::new(pid, stop_tx, monitor);

        let server_info = match self.registry.attach(project_key, id, handle).await {
            Ok(info) => {
                let _ = attached_tx.send(());
                info
            }
            Err(handle) => {
                handle.stop();
                return Err(PreviewError::SpawnFailed {
                    command: spec.command,
                    error: "process exited or was stopped while starting".to_string(),
                });
            }
        };

        info!(
            "Started dev server for {} on port {} with PID {:?}",
            project_key, port, pid
        );

        Ok(server_info)
    }

    /// Forward child output line by line into the log buffer and event stream.
    ///
    /// Bytes that are not valid UTF-8 are replaced, never fatal: the pipe
    /// has to stay drained for as long as the child writes to it.
    fn spawn_output_reader<R>(
        &self,
        project_key: String,
        id: Uuid,
        reader: R,
        stream: LogType,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();

            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            "Failed reading {:?} of dev server for {}: {}",
                            stream,
                            project_key,
                            e
                        );
                        break;
                    }
                }

                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                let address_in_use = stream == LogType::Stderr && is_address_in_use(&line);

                manager.add_log(&project_key, stream, line.clone()).await;
                manager.broadcast_event(ServerEvent::ConsoleOutput {
                    project_key: project_key.clone(),
                    text: line,
                    stream,
                });

                if address_in_use {
                    manager.fail_start_address_in_use(&project_key, id).await;
                }
            }
        })
    }

    /// The child reported its port as taken: drop the entry, which terminates
    /// the child, and report the start as failed.
    async fn fail_start_address_in_use(&self, project_key: &str, id: Uuid) {
        let Some(server) = self.registry.remove_if_id(project_key, id).await else {
            return;
        };

        error!(
            "Port {} is already in use, dev server for {} failed to start",
            server.port, project_key
        );
        self.add_log(
            project_key,
            LogType::System,
            format!("Port {} is already in use", server.port),
        )
        .await;
        drop(server);

        self.broadcast_event(ServerEvent::ServerClosed {
            project_key: project_key.to_string(),
            exit_code: Some(1),
        });
    }

    /// Own the child until it exits or its handle asks for termination.
    ///
    /// The exit is handled only after the output readers have drained, so no
    /// console output follows the server-closed event, and only after
    /// `start_server` has attached the process (or given up on it).
    async fn monitor_child(
        self,
        project_key: String,
        id: Uuid,
        mut child: Child,
        mut readers: Vec<JoinHandle<()>>,
        mut stop_rx: oneshot::Receiver<()>,
        attached_rx: oneshot::Receiver<()>,
    ) {
        let exit_code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Failed waiting for dev server of {}: {}", project_key, e);
                    None
                }
            },
            // Fires on an explicit stop and when the handle is dropped
            _ = &mut stop_rx => {
                let exit_code = process::terminate_child(&mut child, self.config.stop_timeout).await;
                debug!("Dev server for {} terminated with code {:?}", project_key, exit_code);
                exit_code
            }
        };

        drain_readers(&project_key, &mut readers).await;
        let _ = attached_rx.await;
        self.handle_exit(&project_key, id, exit_code).await;
    }

    /// Unsolicited exit: remove the entry and report it. A no-op when the
    /// entry was already removed by stop or belongs to a newer process.
    async fn handle_exit(&self, project_key: &str, id: Uuid, exit_code: Option<i32>) {
        let Some(server) = self.registry.remove_if_id(project_key, id).await else {
            return;
        };

        info!(
            "Dev server for {} on port {} exited with code {:?}",
            project_key, server.port, exit_code
        );
        self.add_log(
            project_key,
            LogType::System,
            format!("Process exited with code {:?}", exit_code),
        )
        .await;

        self.broadcast_event(ServerEvent::ServerClosed {
            project_key: project_key.to_string(),
            exit_code,
        });
    }

    /// Stop a running development server.
    ///
    /// The entry is removed immediately and a termination signal is sent to
    /// the child's process group; the eventual exit produces no event. The
    /// returned snapshot carries the `Stopping` status.
    pub async fn stop_server(&self, project_key: &str) -> PreviewResult<ServerInfo> {
        let Some(mut server) = self.registry.remove(project_key).await else {
            return Err(PreviewError::NotRunning {
                project_key: project_key.to_string(),
            });
        };

        info!("Stopping dev server for: {}", project_key);
        server.status = DevServerStatus::Stopping;
        let server_info = server.info();

        if let Some(handle) = server.handle.take() {
            handle.stop();
        }

        self.add_log(
            project_key,
            LogType::System,
            "Server stopped".to_string(),
        )
        .await;

        Ok(server_info)
    }

    /// Stop, wait the restart delay, start again. Not transactional: if the
    /// start fails the project stays stopped.
    pub async fn restart_server(&self, project_key: &str) -> PreviewResult<ServerInfo> {
        self.stop_server(project_key).await?;
        tokio::time::sleep(self.config.restart_delay).await;
        self.start_server(project_key).await
    }

    /// Snapshot of one managed server
    pub async fn get_server_status(&self, project_key: &str) -> Option<ServerInfo> {
        self.registry.get(project_key).await
    }

    /// Lifecycle state of a project; `Stopped` when it has no server
    pub async fn server_state(&self, project_key: &str) -> DevServerStatus {
        self.registry
            .get(project_key)
            .await
            .map(|s| s.status)
            .unwrap_or(DevServerStatus::Stopped)
    }

    /// Snapshots of every managed server, oldest first
    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        self.registry.list().await
    }

    /// Run one scan cycle and replace the external registry with its result.
    ///
    /// Always publishes an `external-servers-update` event, even when
    /// nothing changed.
    pub async fn scan_external_servers(&self) -> Vec<ExternalProcess> {
        let managed = self.registry.ports().await;
        let found = discovery::scan_ports(
            &self.config.scan_ports,
            &managed,
            self.lookup.as_ref(),
            self.config.lookup_timeout,
        )
        .await;

        {
            let mut external = self.external_servers.write().await;
            // Servers started while the scan was running
            let managed = self.registry.ports().await;
            *external = found
                .into_iter()
                .filter(|server| !managed.contains(&server.port))
                .map(|server| (server.port, server))
                .collect();
        }

        self.publish_external_servers().await
    }

    /// Current external registry, ordered by port
    pub async fn list_external_servers(&self) -> Vec<ExternalProcess> {
        let managed = self.registry.ports().await;
        self.external_servers
            .read()
            .await
            .values()
            .filter(|server| !managed.contains(&server.port))
            .cloned()
            .collect()
    }

    async fn publish_external_servers(&self) -> Vec<ExternalProcess> {
        let servers = self.list_external_servers().await;
        self.broadcast_event(ServerEvent::ExternalServersUpdate {
            servers: servers.clone(),
        });
        servers
    }

    /// Kill the external server registered on `port`.
    ///
    /// The entry is removed and an update published before the signal is
    /// sent. A rescan is scheduled either way so the next snapshot reflects
    /// what actually happened.
    pub async fn kill_external_server(&self, port: u16) -> PreviewResult<()> {
        let target = self
            .external_servers
            .write()
            .await
            .remove(&port)
            .ok_or(PreviewError::NotFound { port })?;

        info!(
            "Killing external server on port {} (PID {}): {}",
            port, target.pid, target.command
        );
        self.publish_external_servers().await;

        let result = process::kill_pid(target.pid).await;

        let delay = match &result {
            Ok(()) => self.config.rescan_after_kill,
            Err(e) => {
                warn!("Failed to kill external server on port {}: {}", port, e);
                RESCAN_AFTER_FAILED_KILL
            }
        };
        self.schedule_rescan(delay);

        result
    }

    /// One-shot rescan after `delay`, cancelled by shutdown
    fn schedule_rescan(&self, delay: Duration) {
        let manager = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    debug!("Running follow-up scan after kill");
                    manager.scan_external_servers().await;
                }
                _ = shutdown.changed() => {}
            }
        });
    }

    /// Start the periodic external server scan.
    ///
    /// Returns `false` when discovery is disabled in the configuration or the
    /// task is already running.
    pub async fn start_periodic_discovery(&self) -> bool {
        if !self.config.discovery_enabled {
            debug!("External server discovery is disabled");
            return false;
        }

        let mut task = self.discovery_task.lock().await;
        if task.is_some() {
            debug!("Periodic discovery task already started");
            return false;
        }

        *task = Some(discovery::spawn_discovery_task(
            self.clone(),
            self.config.discovery_interval,
            self.shutdown_tx.subscribe(),
        ));
        true
    }

    /// Stop background tasks and terminate every managed server.
    ///
    /// Waits for each child to exit, bounded by the stop timeout.
    pub async fn shutdown(&self) {
        info!("Shutting down preview manager");
        self.shutdown_tx.send_replace(true);

        if let Some(task) = self.discovery_task.lock().await.take() {
            task.abort();
        }

        let servers = self.registry.drain().await;
        let grace = self.config.stop_timeout + OUTPUT_DRAIN_TIMEOUT + Duration::from_secs(1);

        let waits = servers.into_iter().filter_map(|mut server| {
            info!("Stopping dev server for: {}", server.project_key);
            let project_key = server.project_key.clone();
            server
                .handle
                .take()
                .and_then(|handle| handle.stop())
                .map(|monitor| async move {
                    if tokio::time::timeout(grace, monitor).await.is_err() {
                        warn!("Dev server for {} did not stop in time", project_key);
                    }
                })
        });
        join_all(waits).await;

        self.external_servers.write().await.clear();
        info!("Preview manager shut down");
    }
}

/// Wait for a child's output readers to hit end of stream. Readers still
/// blocked after the drain timeout are aborted.
async fn drain_readers(project_key: &str, readers: &mut [JoinHandle<()>]) {
    let drained = tokio::time::timeout(
        OUTPUT_DRAIN_TIMEOUT,
        join_all(readers.iter_mut()),
    )
    .await;

    if drained.is_err() {
        warn!(
            "Output of dev server for {} still open after exit, detaching",
            project_key
        );
        for reader in readers.iter() {
            reader.abort();
        }
    }
}

/// Signature of a child that could not bind its port
fn is_address_in_use(line: &str) -> bool {
    line.contains("EADDRINUSE") || line.contains("address already in use")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupError, ProcessOwner};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoLookup;

    #[async_trait]
    impl ProcessLookup for NoLookup {
        async fn lookup(&self, port: u16) -> Result<ProcessOwner, LookupError> {
            Err(LookupError::NotFound { port })
        }
    }

    struct UnknownLauncher;

    impl Launcher for UnknownLauncher {
        fn prepare(&self, project_root: &Path) -> PreviewResult<SpawnSpec> {
            Err(PreviewError::UnknownProjectType {
                project_key: project_root.display().to_string(),
            })
        }
    }

    struct MissingBinaryLauncher;

    impl Launcher for MissingBinaryLauncher {
        fn prepare(&self, _project_root: &Path) -> PreviewResult<SpawnSpec> {
            Ok(SpawnSpec {
                program: PathBuf::from("/definitely/not/a/binary"),
                args: vec![],
                cwd: std::env::temp_dir(),
                env: vec![],
                command: "dev".to_string(),
                project_type: None,
            })
        }
    }

    fn manager_with(launcher: Arc<dyn Launcher>) -> PreviewManager {
        let config = PreviewConfig {
            port_settle_delay: Duration::from_millis(5),
            ..PreviewConfig::default()
        };
        PreviewManager::with_components(config, launcher, Arc::new(NoLookup))
    }

    fn project_key() -> String {
        std::env::temp_dir()
            .join("devdock-manager-test")
            .display()
            .to_string()
    }

    #[test]
    fn test_is_address_in_use() {
        assert!(is_address_in_use(
            "Error: listen EADDRINUSE: address already in use :::3000"
        ));
        assert!(is_address_in_use("OSError: [Errno 98] address already in use"));
        assert!(!is_address_in_use("ready - started server on 0.0.0.0:3000"));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_key() {
        let manager = manager_with(Arc::new(UnknownLauncher));
        let result = manager.start_server("relative/path").await;
        assert!(matches!(result, Err(PreviewError::InvalidProjectKey { .. })));
    }

    #[tokio::test]
    async fn test_start_unknown_project_type() {
        let manager = manager_with(Arc::new(UnknownLauncher));
        let result = manager.start_server(&project_key()).await;

        assert!(matches!(result, Err(PreviewError::UnknownProjectType { .. })));
        assert!(manager.list_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_entry() {
        let manager = manager_with(Arc::new(MissingBinaryLauncher));
        let key = project_key();

        let result = manager.start_server(&key).await;

        assert!(matches!(result, Err(PreviewError::SpawnFailed { .. })));
        assert_eq!(manager.server_state(&key).await, DevServerStatus::Stopped);
        assert!(!manager.get_server_logs(&key, None, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_project() {
        let manager = manager_with(Arc::new(UnknownLauncher));
        let result = manager.stop_server(&project_key()).await;
        assert!(matches!(result, Err(PreviewError::NotRunning { .. })));

        let result = manager.restart_server(&project_key()).await;
        assert!(matches!(result, Err(PreviewError::NotRunning { .. })));
    }

    #[tokio::test]
    async fn test_kill_unknown_port() {
        let manager = manager_with(Arc::new(UnknownLauncher));
        let result = manager.kill_external_server(3999).await;
        assert!(matches!(result, Err(PreviewError::NotFound { port: 3999 })));
    }

    #[tokio::test]
    async fn test_log_buffer_is_bounded_and_filterable() {
        let config = PreviewConfig {
            log_buffer_lines: 10,
            ..PreviewConfig::default()
        };
        let manager =
            PreviewManager::with_components(config, Arc::new(UnknownLauncher), Arc::new(NoLookup));

        for i in 0..25 {
            manager
                .add_log("/srv/a", LogType::Stdout, format!("line {}", i))
                .await;
        }

        let logs = manager.get_server_logs("/srv/a", None, None).await;
        assert_eq!(logs.len(), 10);
        assert_eq!(logs[0].message, "line 15");

        let last_three = manager.get_server_logs("/srv/a", None, Some(3)).await;
        assert_eq!(
            last_three.iter().map(|l| l.message.as_str()).collect::<Vec<_>>(),
            vec!["line 22", "line 23", "line 24"]
        );

        let future = Utc::now() + chrono::Duration::minutes(1);
        assert!(manager
            .get_server_logs("/srv/a", Some(future), None)
            .await
            .is_empty());

        manager.clear_server_logs("/srv/a").await;
        assert!(manager.get_server_logs("/srv/a", None, None).await.is_empty());
    }

    /// Counts lookups and reports every port as held by a node process
    #[derive(Default)]
    struct CountingLookup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProcessLookup for CountingLookup {
        async fn lookup(&self, _port: u16) -> Result<ProcessOwner, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessOwner {
                pid: 4242,
                command: "node server.js".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_periodic_discovery() {
        let occupied = std::net::TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = occupied.local_addr().unwrap().port();

        let lookup = Arc::new(CountingLookup::default());
        let config = PreviewConfig {
            scan_ports: vec![port],
            discovery_interval: Duration::from_millis(50),
            ..PreviewConfig::default()
        };
        let manager =
            PreviewManager::with_components(config, Arc::new(UnknownLauncher), lookup.clone());
        let mut events = manager.subscribe();

        assert!(manager.start_periodic_discovery().await);

        // Let a few cycles run
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, ServerEvent::ExternalServersUpdate { .. }));
        }
        assert!(lookup.calls.load(Ordering::SeqCst) >= 3);

        manager.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        while events.try_recv().is_ok() {}
        let calls_after_shutdown = lookup.calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(lookup.calls.load(Ordering::SeqCst), calls_after_shutdown);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert!(manager.list_external_servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_periodic_discovery_respects_config() {
        let config = PreviewConfig {
            discovery_enabled: false,
            ..PreviewConfig::default()
        };
        let manager =
            PreviewManager::with_components(config, Arc::new(UnknownLauncher), Arc::new(NoLookup));
        assert!(!manager.start_periodic_discovery().await);

        let config = PreviewConfig {
            scan_ports: vec![],
            ..PreviewConfig::default()
        };
        let manager =
            PreviewManager::with_components(config, Arc::new(UnknownLauncher), Arc::new(NoLookup));
        let mut events = manager.subscribe();

        assert!(manager.start_periodic_discovery().await);
        assert!(!manager.start_periodic_discovery().await);

        // Startup scan publishes right away
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ServerEvent::ExternalServersUpdate { .. }));

        manager.shutdown().await;
    }
}
