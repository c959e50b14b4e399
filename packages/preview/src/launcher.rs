// ABOUTME: Launcher seam turning a project directory into a concrete program, arguments and environment
// ABOUTME: Default NpmLauncher runs the detected npm script with a resolved npm executable

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::detector::ProjectDetector;
use crate::types::{PreviewError, PreviewResult, SpawnSpec};

/// Decides what to run for a project.
pub trait Launcher: Send + Sync {
    fn prepare(&self, project_root: &Path) -> PreviewResult<SpawnSpec>;
}

#[cfg(unix)]
const COMMON_NPM_LOCATIONS: &[&str] = &[
    "/usr/local/bin/npm",
    "/opt/homebrew/bin/npm",
    "/usr/bin/npm",
    "/opt/local/bin/npm",
];

#[cfg(windows)]
const COMMON_NPM_LOCATIONS: &[&str] = &[
    r"C:\Program Files\nodejs\npm.cmd",
    r"C:\Program Files (x86)\nodejs\npm.cmd",
];

#[cfg(not(any(unix, windows)))]
const COMMON_NPM_LOCATIONS: &[&str] = &[];

/// Runs `npm run <script>` with the script chosen by [`ProjectDetector`].
#[derive(Debug, Clone, Default)]
pub struct NpmLauncher {
    npm_path: Option<PathBuf>,
}

impl NpmLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed npm executable instead of searching for one
    pub fn with_npm_path(npm_path: impl Into<PathBuf>) -> Self {
        Self {
            npm_path: Some(npm_path.into()),
        }
    }

    fn resolve_npm(&self) -> Option<PathBuf> {
        if let Some(path) = &self.npm_path {
            return Some(path.clone());
        }

        if let Ok(path) = which::which("npm") {
            return Some(path);
        }

        COMMON_NPM_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    }
}

impl Launcher for NpmLauncher {
    fn prepare(&self, project_root: &Path) -> PreviewResult<SpawnSpec> {
        let project_type = ProjectDetector::detect_project_type(project_root).ok_or_else(|| {
            PreviewError::UnknownProjectType {
                project_key: project_root.display().to_string(),
            }
        })?;

        let command = ProjectDetector::start_command(project_type);

        let npm = self.resolve_npm().ok_or_else(|| PreviewError::SpawnFailed {
            command: format!("npm run {}", command),
            error: "npm not found".to_string(),
        })?;

        debug!(
            "Prepared {} project at {} with {} run {}",
            project_type,
            project_root.display(),
            npm.display(),
            command
        );

        // npm is a .cmd shim on Windows and has to go through the shell
        #[cfg(windows)]
        let (program, args) = (
            PathBuf::from("cmd"),
            vec![
                "/c".to_string(),
                npm.display().to_string(),
                "run".to_string(),
                command.to_string(),
            ],
        );

        #[cfg(not(windows))]
        let (program, args) = (npm, vec!["run".to_string(), command.to_string()]);

        Ok(SpawnSpec {
            program,
            args,
            cwd: project_root.to_path_buf(),
            env: Vec::new(),
            command: command.to_string(),
            project_type: Some(project_type),
        })
    }
}
