use crate::types::ProjectType;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Project detector for deciding how a project directory is started
pub struct ProjectDetector;

impl ProjectDetector {
    /// Detect the project type from `package.json` and framework config files.
    ///
    /// Returns `None` when there is no readable `package.json` or nothing in it
    /// suggests a runnable dev command.
    pub fn detect_project_type<P: AsRef<Path>>(project_root: P) -> Option<ProjectType> {
        let project_root = project_root.as_ref();
        let package_json_path = project_root.join("package.json");

        if !package_json_path.exists() {
            debug!("No package.json in {}", project_root.display());
            return None;
        }

        let package_json: Value = match fs::read_to_string(&package_json_path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
        {
            Ok(value) => value,
            Err(e) => {
                debug!(
                    "Could not read {}: {}",
                    package_json_path.display(),
                    e
                );
                return None;
            }
        };

        let dependencies = package_json.get("dependencies").unwrap_or(&Value::Null);
        let dev_dependencies = package_json
            .get("devDependencies")
            .unwrap_or(&Value::Null);
        let scripts = package_json.get("scripts").unwrap_or(&Value::Null);

        if project_root.join("next.config.js").exists()
            || project_root.join("next.config.ts").exists()
            || Self::has_key(dependencies, "next")
        {
            return Some(ProjectType::Nextjs);
        }

        if Self::has_key(dev_dependencies, "vite") || Self::has_key(dependencies, "vite") {
            return Some(ProjectType::Vite);
        }

        if Self::has_key(dependencies, "react-scripts") {
            return Some(ProjectType::React);
        }

        if Self::has_key(dependencies, "vue") {
            return Some(ProjectType::Vue);
        }

        if Self::has_key(scripts, "start") && !Self::has_key(dependencies, "react") {
            return Some(ProjectType::Node);
        }

        if Self::has_key(scripts, "dev") || Self::has_key(scripts, "start") {
            return Some(ProjectType::Npm);
        }

        None
    }

    /// npm script that launches the dev server for a project type
    pub fn start_command(project_type: ProjectType) -> &'static str {
        match project_type {
            ProjectType::Nextjs => "dev",
            ProjectType::Vite => "dev",
            ProjectType::React => "start",
            ProjectType::Vue => "serve",
            ProjectType::Node => "start",
            ProjectType::Npm => "dev",
        }
    }

    /// Check if a key exists with a truthy value, e.g. a dependency or script
    fn has_key(section: &Value, key: &str) -> bool {
        section
            .as_object()
            .and_then(|obj| obj.get(key))
            .map(|v| match v {
                Value::Null | Value::Bool(false) => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            })
            .unwrap_or(false)
    }
}
