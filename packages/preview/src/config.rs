// ABOUTME: Orchestrator configuration with fixed candidate port lists and timing knobs
// ABOUTME: Defaults mirror common framework ports; DEVDOCK_* variables may override them

use devdock_config::constants;
use std::time::Duration;

use crate::env::{parse_bool_env, parse_env_or_default_with_validation, parse_port_list_env};

/// Ports tried in order when allocating a port for a new managed server.
pub const DEFAULT_PREFERRED_PORTS: &[u16] = &[3000, 3001, 3002, 4000, 5000, 5173, 8000, 8080];

/// Ports probed on every scan cycle for externally launched servers.
pub const DEFAULT_SCAN_PORTS: &[u16] = &[
    3000, 3001, 3002, 3003, 3004, 3005, // Common React/Node ports
    3010, 3020, 3030, 3040, 3050, // Common alternates
    3100, 3200, 3300, 3333, 3456, // Other common choices
    3500, 3600, 3700, 3800, 3900, // Round numbers
];

const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 10;
const DEFAULT_PORT_SETTLE_MS: u64 = 100;
const DEFAULT_RESTART_DELAY_MS: u64 = 1000;
const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RESCAN_AFTER_KILL_MS: u64 = 3000;
const DEFAULT_LOG_BUFFER_LINES: usize = 1000;
const DEFAULT_EVENT_CHANNEL_SIZE: usize = 200;

/// Runtime configuration for [`PreviewManager`](crate::PreviewManager).
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Allocation candidates, highest priority first
    pub preferred_ports: Vec<u16>,
    /// Candidates probed for external servers
    pub scan_ports: Vec<u16>,
    /// Whether `start_periodic_discovery` spawns the scan task at all
    pub discovery_enabled: bool,
    pub discovery_interval: Duration,
    /// Delay between the two probes of a preferred port
    pub port_settle_delay: Duration,
    /// Delay between stop and start during a restart
    pub restart_delay: Duration,
    /// Upper bound for one platform PID/command lookup
    pub lookup_timeout: Duration,
    /// Grace period after SIGTERM before a stopped child is force-killed
    pub stop_timeout: Duration,
    /// Delay before the follow-up scan that confirms a kill
    pub rescan_after_kill: Duration,
    pub log_buffer_lines: usize,
    pub event_channel_size: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            preferred_ports: DEFAULT_PREFERRED_PORTS.to_vec(),
            scan_ports: DEFAULT_SCAN_PORTS.to_vec(),
            discovery_enabled: true,
            discovery_interval: Duration::from_secs(DEFAULT_DISCOVERY_INTERVAL_SECS),
            port_settle_delay: Duration::from_millis(DEFAULT_PORT_SETTLE_MS),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            rescan_after_kill: Duration::from_millis(DEFAULT_RESCAN_AFTER_KILL_MS),
            log_buffer_lines: DEFAULT_LOG_BUFFER_LINES,
            event_channel_size: DEFAULT_EVENT_CHANNEL_SIZE,
        }
    }
}

impl PreviewConfig {
    /// Build a configuration from `DEVDOCK_*` environment variables.
    ///
    /// Every unset or invalid variable keeps its default; invalid values are
    /// logged at warn level.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            preferred_ports: parse_port_list_env(
                constants::DEVDOCK_PREFERRED_PORTS,
                DEFAULT_PREFERRED_PORTS,
            ),
            scan_ports: parse_port_list_env(constants::DEVDOCK_SCAN_PORTS, DEFAULT_SCAN_PORTS),
            discovery_enabled: parse_bool_env(
                constants::DEVDOCK_DISCOVERY_ENABLED,
                defaults.discovery_enabled,
            ),
            // Min 2s, max 5 minutes
            discovery_interval: Duration::from_secs(parse_env_or_default_with_validation(
                constants::DEVDOCK_DISCOVERY_INTERVAL_SECS,
                DEFAULT_DISCOVERY_INTERVAL_SECS,
                |v| (2..=300).contains(&v),
            )),
            port_settle_delay: Duration::from_millis(parse_env_or_default_with_validation(
                constants::DEVDOCK_PORT_SETTLE_MS,
                DEFAULT_PORT_SETTLE_MS,
                |v| v <= 5000,
            )),
            restart_delay: Duration::from_millis(parse_env_or_default_with_validation(
                constants::DEVDOCK_RESTART_DELAY_MS,
                DEFAULT_RESTART_DELAY_MS,
                |v| v <= 60_000,
            )),
            lookup_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                constants::DEVDOCK_LOOKUP_TIMEOUT_SECS,
                DEFAULT_LOOKUP_TIMEOUT_SECS,
                |v| (1..=60).contains(&v),
            )),
            stop_timeout: Duration::from_secs(parse_env_or_default_with_validation(
                constants::DEVDOCK_STOP_TIMEOUT_SECS,
                DEFAULT_STOP_TIMEOUT_SECS,
                |v| (1..=120).contains(&v),
            )),
            rescan_after_kill: Duration::from_millis(parse_env_or_default_with_validation(
                constants::DEVDOCK_RESCAN_AFTER_KILL_MS,
                DEFAULT_RESCAN_AFTER_KILL_MS,
                |v| v <= 60_000,
            )),
            log_buffer_lines: parse_env_or_default_with_validation(
                constants::DEVDOCK_LOG_BUFFER_LINES,
                DEFAULT_LOG_BUFFER_LINES,
                |v| (10..=100_000).contains(&v),
            ),
            event_channel_size: parse_env_or_default_with_validation(
                constants::DEVDOCK_EVENT_CHANNEL_SIZE,
                DEFAULT_EVENT_CHANNEL_SIZE,
                |v| (10..=10_000).contains(&v),
            ),
        }
    }
}
