pub mod mac;
pub mod model;
pub mod payloads;
pub mod summary;
pub mod tracker;

/// Default interval between layer-2 sweeps, in seconds
pub const DEFAULT_PING_INTERVAL_SECONDS: u64 = 60;

/// Consecutive empty sweeps before a previously online employee is declared offline
pub const DEFAULT_OFFLINE_FAILURE_COUNT: u32 = 2;

/// Trailing online credit (seconds) granted at the moment of an agent outage
pub const DEFAULT_OFFLINE_THRESHOLD_SECONDS: i64 = 15;

/// TTL of the distributed scan lock, in seconds
pub const DEFAULT_PING_LOCK_TIMEOUT_SECONDS: i64 = 60;

/// Self-heartbeat staleness beyond which an outage is assumed, in seconds
pub const DEFAULT_SYSTEM_HEARTBEAT_CHECK_SECONDS: i64 = 120;

/// Cadence of the self-heartbeat writer, in seconds
pub const SELF_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

/// Cadence of the full roster heartbeat to the cloud, in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 300;

/// Cadence of the unsynced-summary retry task, in seconds
pub const DEFAULT_RETRY_INTERVAL_SECONDS: u64 = 900;

/// Hard kill timeout for the sweep subprocess, in seconds
pub const PROBE_TIMEOUT_SECONDS: u64 = 30;

/// HTTP timeout for cloud requests, in seconds
pub const CLOUD_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Name of the distributed lock guarding the scan loop
pub const SCAN_LOCK_NAME: &str = "ping_all_devices_lock";

/// Placeholder area identifier until multi-area support lands
pub const DEFAULT_AREA: &str = "default";
