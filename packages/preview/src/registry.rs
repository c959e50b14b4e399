use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::process::ProcessHandle;
use crate::types::{DevServerStatus, ServerInfo};

/// A development server spawned by this process
#[derive(Debug)]
pub struct ManagedServer {
    pub id: Uuid,
    pub project_key: String,
    pub port: u16,
    pub command: String,
    pub framework_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub status: DevServerStatus,
    /// Set once the child exists; dropping it terminates the child
    pub handle: Option<ProcessHandle>,
}

impl ManagedServer {
    pub fn new(
        project_key: String,
        port: u16,
        command: String,
        framework_name: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_key,
            port,
            command,
            framework_name,
            started_at: Utc::now(),
            status: DevServerStatus::Starting,
            handle: None,
        }
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            id: self.id,
            project_key: self.project_key.clone(),
            port: self.port,
            command: self.command.clone(),
            pid: self.handle.as_ref().and_then(|h| h.pid()),
            status: self.status,
            framework_name: self.framework_name.clone(),
            started_at: self.started_at,
        }
    }
}

/// Servers this process spawned, keyed by project key.
///
/// Every check-and-write happens under a single write guard, so two
/// concurrent starts for one key cannot both insert.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    servers: RwLock<HashMap<String, ManagedServer>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `server` unless its key is taken. On conflict the server is
    /// handed back and the existing entry is untouched.
    pub async fn try_insert(&self, server: ManagedServer) -> Result<(), ManagedServer> {
        let mut servers = self.servers.write().await;
        if servers.contains_key(&server.project_key) {
            return Err(server);
        }
        debug!(
            "Registered {} on port {} ({})",
            server.project_key, server.port, server.id
        );
        servers.insert(server.project_key.clone(), server);
        Ok(())
    }

    /// Attach the live process to the entry created by `try_insert` and mark
    /// it running. Hands the process back if the entry was removed meanwhile.
    pub async fn attach(
        &self,
        project_key: &str,
        id: Uuid,
        handle: ProcessHandle,
    ) -> Result<ServerInfo, ProcessHandle> {
        let mut servers = self.servers.write().await;
        match servers.get_mut(project_key) {
            Some(server) if server.id == id => {
                server.handle = Some(handle);
                server.status = DevServerStatus::Running;
                Ok(server.info())
            }
            _ => Err(handle),
        }
    }

    pub async fn remove(&self, project_key: &str) -> Option<ManagedServer> {
        self.servers.write().await.remove(project_key)
    }

    /// Remove the entry only if it still belongs to process instance `id`.
    pub async fn remove_if_id(&self, project_key: &str, id: Uuid) -> Option<ManagedServer> {
        let mut servers = self.servers.write().await;
        if servers.get(project_key).map(|s| s.id) == Some(id) {
            servers.remove(project_key)
        } else {
            None
        }
    }

    pub async fn contains(&self, project_key: &str) -> bool {
        self.servers.read().await.contains_key(project_key)
    }

    pub async fn get(&self, project_key: &str) -> Option<ServerInfo> {
        self.servers.read().await.get(project_key).map(|s| s.info())
    }

    pub async fn list(&self) -> Vec<ServerInfo> {
        let servers = self.servers.read().await;
        let mut list: Vec<ServerInfo> = servers.values().map(|s| s.info()).collect();
        list.sort_by_key(|s| s.started_at);
        list
    }

    /// Ports currently held by managed servers
    pub async fn ports(&self) -> HashSet<u16> {
        self.servers.read().await.values().map(|s| s.port).collect()
    }

    /// Remove and return every entry
    pub async fn drain(&self) -> Vec<ManagedServer> {
        self.servers.write().await.drain().map(|(_, s)| s).collect()
    }
}
