// ABOUTME: Validation utilities for project keys
// ABOUTME: Keys are absolute project paths; rejects traversal, NUL bytes and control characters

use std::path::{Component, Path};

use crate::types::{PreviewError, PreviewResult};

/// Validates a project key
///
/// Checks that the key:
/// - Is not empty
/// - Is an absolute path
/// - Does not contain `..` components
/// - Does not contain NUL bytes or control characters (log injection)
///
/// # Examples
///
/// ```
/// use devdock_preview::validation::validate_project_key;
///
/// # #[cfg(unix)]
/// # {
/// assert!(validate_project_key("/home/me/site").is_ok());
/// assert!(validate_project_key("site").is_err());
/// assert!(validate_project_key("/home/me/../etc").is_err());
/// # }
/// ```
pub fn validate_project_key(project_key: &str) -> PreviewResult<()> {
    let invalid = |reason: &str| PreviewError::InvalidProjectKey {
        project_key: project_key.escape_debug().to_string(),
        reason: reason.to_string(),
    };

    if project_key.trim().is_empty() {
        return Err(invalid("project key cannot be empty"));
    }

    if project_key.contains('\0') {
        return Err(invalid("contains null byte"));
    }

    if project_key.chars().any(|c| c.is_control()) {
        return Err(invalid("contains control characters"));
    }

    let path = Path::new(project_key);
    if !path.is_absolute() {
        return Err(invalid("must be an absolute path"));
    }

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(invalid("contains path traversal sequence"));
    }

    Ok(())
}
