// ABOUTME: Environment variable parsing utilities
// ABOUTME: Validated parsing of numbers, flags and port lists with logged fallbacks

use std::str::FromStr;
use tracing;

/// Parse an environment variable with validation
/// Returns the parsed value if it passes validation, otherwise returns the default
/// Logs warnings when environment variables are set but fail validation or parsing
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    match std::env::var(var_name) {
        Ok(raw_value) => match raw_value.trim().parse::<T>() {
            Ok(parsed_value) => {
                if validator(parsed_value) {
                    parsed_value
                } else {
                    tracing::warn!(
                        "Environment variable {} has invalid value '{}', using default: {}",
                        var_name,
                        raw_value,
                        default
                    );
                    default
                }
            }
            Err(_) => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
        },
        // Not set is the normal case
        Err(_) => default,
    }
}

/// Parse a boolean flag. Accepts `true`/`1`/`yes` and `false`/`0`/`no` (any case).
pub fn parse_bool_env(var_name: &str, default: bool) -> bool {
    match std::env::var(var_name) {
        Ok(raw_value) => match raw_value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a comma separated port list such as `3000,3001,5173`.
///
/// Invalid entries and port 0 are skipped. If nothing valid remains the default
/// list is returned, so a typo never leaves the orchestrator without candidates.
pub fn parse_port_list_env(var_name: &str, default: &[u16]) -> Vec<u16> {
    let Ok(raw_value) = std::env::var(var_name) else {
        return default.to_vec();
    };

    let ports: Vec<u16> = raw_value
        .split(',')
        .filter_map(|s| s.trim().parse::<u16>().ok())
        .filter(|&p| p != 0)
        .collect();

    if ports.is_empty() {
        tracing::warn!(
            "Environment variable {} has no valid ports in '{}', using defaults",
            var_name,
            raw_value
        );
        return default.to_vec();
    }

    ports
}
