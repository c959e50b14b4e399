pub mod discovery;
pub mod servers;

use std::path::{Path, PathBuf};

/// Turn a user supplied directory into a project key (absolute, normalized path)
pub fn project_key(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let absolute: PathBuf = std::fs::canonicalize(path)
        .map_err(|e| format!("Cannot open project directory '{}': {}", path.display(), e))?;
    Ok(absolute.display().to_string())
}
