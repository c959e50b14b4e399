// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across devdock

// Port Candidate Lists
pub const DEVDOCK_PREFERRED_PORTS: &str = "DEVDOCK_PREFERRED_PORTS";
pub const DEVDOCK_SCAN_PORTS: &str = "DEVDOCK_SCAN_PORTS";

// Port Allocation
pub const DEVDOCK_PORT_SETTLE_MS: &str = "DEVDOCK_PORT_SETTLE_MS";

// Managed Server Lifecycle
pub const DEVDOCK_RESTART_DELAY_MS: &str = "DEVDOCK_RESTART_DELAY_MS";
pub const DEVDOCK_STOP_TIMEOUT_SECS: &str = "DEVDOCK_STOP_TIMEOUT_SECS";
pub const DEVDOCK_LOG_BUFFER_LINES: &str = "DEVDOCK_LOG_BUFFER_LINES";
pub const DEVDOCK_EVENT_CHANNEL_SIZE: &str = "DEVDOCK_EVENT_CHANNEL_SIZE";

// External Server Discovery
pub const DEVDOCK_DISCOVERY_ENABLED: &str = "DEVDOCK_DISCOVERY_ENABLED";
pub const DEVDOCK_DISCOVERY_INTERVAL_SECS: &str = "DEVDOCK_DISCOVERY_INTERVAL_SECS";
pub const DEVDOCK_LOOKUP_TIMEOUT_SECS: &str = "DEVDOCK_LOOKUP_TIMEOUT_SECS";
pub const DEVDOCK_RESCAN_AFTER_KILL_MS: &str = "DEVDOCK_RESCAN_AFTER_KILL_MS";

// Child Process Environment
pub const PORT: &str = "PORT";
pub const PATH: &str = "PATH";
pub const NEXT_TELEMETRY_DISABLED: &str = "NEXT_TELEMETRY_DISABLED";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
