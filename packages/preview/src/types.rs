use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Project type detected from the codebase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Nextjs,
    Vite,
    React,
    Vue,
    Node,
    Npm,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Nextjs => "nextjs",
            ProjectType::Vite => "vite",
            ProjectType::React => "react",
            ProjectType::Vue => "vue",
            ProjectType::Node => "node",
            ProjectType::Npm => "npm",
        }
    }

    /// Human readable framework name shown next to a running server
    pub fn framework_name(&self) -> &'static str {
        match self {
            ProjectType::Nextjs => "Next.js",
            ProjectType::Vite => "Vite",
            ProjectType::React => "Create React App",
            ProjectType::Vue => "Vue",
            ProjectType::Node => "Node.js",
            ProjectType::Npm => "npm scripts",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a project's development server.
///
/// `Stopped` is never stored: a project without a registry entry is stopped.
/// An unexpected exit goes straight back to `Stopped` and is reported through
/// [`ServerEvent::ServerClosed`] with the exit code attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl DevServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevServerStatus::Stopped => "stopped",
            DevServerStatus::Starting => "starting",
            DevServerStatus::Running => "running",
            DevServerStatus::Stopping => "stopping",
        }
    }
}

/// Log entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Stdout,
    Stderr,
    System,
}

/// Development server log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerLog {
    pub timestamp: DateTime<Utc>,
    pub log_type: LogType,
    pub message: String,
}

/// Snapshot of a managed server, safe to hand to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Unique identifier of this process instance (changes on every start)
    pub id: Uuid,
    /// Absolute project path
    pub project_key: String,
    pub port: u16,
    /// Logical start command, e.g. "dev" or "start"
    pub command: String,
    pub pid: Option<u32>,
    pub status: DevServerStatus,
    pub framework_name: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ServerInfo {
    pub fn preview_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

/// Outcome of the dev-server classification policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    DevServer,
    Excluded,
}

/// A process this tool did not spawn that occupies a scanned port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProcess {
    pub port: u16,
    pub pid: u32,
    /// Resolved command line of the owning process
    pub command: String,
    pub classification: Classification,
    /// Best-effort framework hint derived from the command line
    pub framework_name: Option<String>,
}

/// Program, arguments and environment used to launch a project's server.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    /// Logical start command recorded in the registry
    pub command: String,
    pub project_type: Option<ProjectType>,
}

/// Push events for the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// One line of child output
    ConsoleOutput {
        project_key: String,
        text: String,
        stream: LogType,
    },
    /// A managed server left the registry on its own (exit or failed start)
    ServerClosed {
        project_key: String,
        exit_code: Option<i32>,
    },
    /// Full replacement snapshot of the external registry
    ExternalServersUpdate { servers: Vec<ExternalProcess> },
}

/// Error types for orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("Server already running for project: {project_key}")]
    AlreadyRunning { project_key: String },

    #[error("Server not running for project: {project_key}")]
    NotRunning { project_key: String },

    #[error("Unknown project type: {project_key}")]
    UnknownProjectType { project_key: String },

    #[error("Invalid project key '{project_key}': {reason}")]
    InvalidProjectKey { project_key: String, reason: String },

    #[error("No free port available: {reason}")]
    PortExhausted { reason: String },

    #[error("Could not resolve the process on port {port}: {reason}")]
    ProcessLookupFailed { port: u16, reason: String },

    #[error("No external server registered on port {port}")]
    NotFound { port: u16 },

    #[error("Failed to kill process with PID {pid}: {error}")]
    KillFailed { pid: u32, error: String },

    #[error("Failed to spawn process '{command}': {error}")]
    SpawnFailed { command: String, error: String },
}

/// Result type for orchestrator operations
pub type PreviewResult<T> = Result<T, PreviewError>;
