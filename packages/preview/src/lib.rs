//! devdock Preview - Development server process and port orchestration
//!
//! This crate spawns and tracks one development server per project directory,
//! allocates ports for them, and periodically discovers servers that were
//! started outside of devdock on common development ports.

pub mod classifier;
pub mod config;
pub mod detector;
pub mod discovery;
pub mod env;
pub mod launcher;
pub mod lookup;
pub mod manager;
pub mod ports;
pub mod process;
pub mod registry;
pub mod types;
pub mod validation;

// Re-export key types and functions for easier use
pub use classifier::{detect_framework_from_command, is_likely_dev_server};
pub use config::PreviewConfig;
pub use detector::ProjectDetector;
pub use launcher::{Launcher, NpmLauncher};
pub use lookup::{LookupError, ProcessLookup, ProcessOwner, SystemLookup};
pub use manager::PreviewManager;
pub use types::{
    Classification, DevServerLog, DevServerStatus, ExternalProcess, LogType, PreviewError,
    PreviewResult, ProjectType, ServerEvent, ServerInfo, SpawnSpec,
};

/// Initialize the orchestrator from the environment.
///
/// Reads `DEVDOCK_*` overrides, creates a [`PreviewManager`] with the default
/// npm launcher and system lookup, and starts periodic discovery of external
/// servers unless it is disabled.
///
/// # Examples
///
/// ```no_run
/// #[tokio::main]
/// async fn main() {
///     let manager = devdock_preview::init().await;
///     let mut events = manager.subscribe();
///     // Events start flowing once discovery or a managed server produces them
///     let _ = events.recv().await;
///     manager.shutdown().await;
/// }
/// ```
pub async fn init() -> PreviewManager {
    let manager = PreviewManager::new(PreviewConfig::from_env());
    manager.start_periodic_discovery().await;
    manager
}

/// Version information for the preview crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
