mod outage;
mod prober;
mod reporter;
mod scan_loop;
mod scheduler;
mod self_heartbeat;
mod store;
mod summariser;
mod watchdog;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use presence_core::{
    DEFAULT_HEARTBEAT_INTERVAL_SECONDS, DEFAULT_OFFLINE_FAILURE_COUNT,
    DEFAULT_OFFLINE_THRESHOLD_SECONDS, DEFAULT_PING_INTERVAL_SECONDS,
    DEFAULT_PING_LOCK_TIMEOUT_SECONDS, DEFAULT_RETRY_INTERVAL_SECONDS,
    DEFAULT_SYSTEM_HEARTBEAT_CHECK_SECONDS, PROBE_TIMEOUT_SECONDS,
};

use crate::reporter::Reporter;
use crate::scan_loop::ScanLoop;
use crate::scheduler::task_pulse;
use crate::store::Store;

/// All runtime configuration, environment-first (every flag can also be
/// passed on the command line). The roster itself lives in the database
/// and is administered externally.
#[derive(Parser, Debug, Clone)]
#[command(name = "presence-agent", about = "On-premise employee presence agent")]
pub struct AgentConfig {
    /// Site identifier sent with every cloud request
    #[arg(long, env = "SITE_ID")]
    pub site_id: String,

    /// Base URL of the cloud API
    #[arg(long, env = "CLOUD_API_URL")]
    pub cloud_api_url: String,

    /// Bearer token for cloud requests
    #[arg(long, env = "AGENT_AUTH_TOKEN", hide_env_values = true)]
    pub agent_auth_token: String,

    /// Network interface handed to the sweep tool
    #[arg(long, env = "NETWORK_INTERFACE")]
    pub network_interface: String,

    /// Subnet to sweep, in CIDR form
    #[arg(long, env = "SUBNET")]
    pub subnet: String,

    /// Seconds between layer-2 sweeps
    #[arg(long, env = "PING_INTERVAL_SECONDS", default_value_t = DEFAULT_PING_INTERVAL_SECONDS)]
    pub ping_interval_seconds: u64,

    /// Consecutive empty sweeps before an online employee goes offline
    #[arg(long, env = "OFFLINE_FAILURE_COUNT", default_value_t = DEFAULT_OFFLINE_FAILURE_COUNT)]
    pub offline_failure_count: u32,

    /// Trailing online credit (seconds) applied during outage recovery
    #[arg(long, env = "OFFLINE_THRESHOLD_SECONDS", default_value_t = DEFAULT_OFFLINE_THRESHOLD_SECONDS)]
    pub offline_threshold_seconds: i64,

    /// TTL of the scan lock
    #[arg(long, env = "PING_LOCK_TIMEOUT_SECONDS", default_value_t = DEFAULT_PING_LOCK_TIMEOUT_SECONDS)]
    pub ping_lock_timeout_seconds: i64,

    /// Self-heartbeat staleness beyond which an outage is assumed
    #[arg(long, env = "SYSTEM_HEARTBEAT_CHECK_SECONDS", default_value_t = DEFAULT_SYSTEM_HEARTBEAT_CHECK_SECONDS)]
    pub system_heartbeat_check_seconds: i64,

    /// Seconds between periodic full-roster heartbeats
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECONDS", default_value_t = DEFAULT_HEARTBEAT_INTERVAL_SECONDS)]
    pub heartbeat_interval_seconds: u64,

    /// Seconds between retries of unsynced summaries
    #[arg(long, env = "RETRY_INTERVAL_SECONDS", default_value_t = DEFAULT_RETRY_INTERVAL_SECONDS)]
    pub retry_interval_seconds: u64,

    /// Path to the SQLite database
    #[arg(long = "db", env = "DATABASE_PATH", default_value = "presence.db")]
    pub database_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AgentConfig::parse();

    info!(
        site = %config.site_id,
        subnet = %config.subnet,
        interface = %config.network_interface,
        "Presence agent starting"
    );

    // The store is the only fatal dependency -- everything else degrades
    let store = Arc::new(Store::open(&config.database_path)?);

    let rewritten = store.normalise_device_macs()?;
    if rewritten > 0 {
        info!(rewritten, "Normalised legacy device MACs");
    }

    // Attribute any lost time before the first sweep can write new rows
    if let Err(e) = outage::check(
        &store,
        chrono::Utc::now(),
        config.system_heartbeat_check_seconds,
        config.offline_threshold_seconds,
    ) {
        warn!(error = %e, "Startup outage check failed");
    }

    let reporter = Arc::new(Reporter::new(&config));

    // Co-located agents booted by the same power event shouldn't sweep in
    // lockstep
    tokio::time::sleep(scheduler::startup_jitter(Duration::from_secs(5))).await;

    let cancel = CancellationToken::new();

    // Create task pulse pairs; each liveness window tracks its own cadence
    let (scan_pulse, scan_monitor) = task_pulse(
        "scan-loop",
        Duration::from_secs(config.ping_interval_seconds * 3 + PROBE_TIMEOUT_SECONDS),
    );
    let (heartbeat_pulse, heartbeat_monitor) = task_pulse(
        "heartbeat",
        Duration::from_secs(config.heartbeat_interval_seconds * 2),
    );
    let (retry_pulse, retry_monitor) = task_pulse(
        "summary-retry",
        Duration::from_secs(config.retry_interval_seconds * 2),
    );
    // Wide window: delivering a large batch over a slow link takes a while
    let (summariser_pulse, summariser_monitor) =
        task_pulse("summariser", Duration::from_secs(15 * 60));
    let (self_heartbeat_pulse, self_heartbeat_monitor) =
        task_pulse("self-heartbeat", Duration::from_secs(90));
    let (outage_pulse, outage_monitor) = task_pulse(
        "outage-detector",
        Duration::from_secs(config.system_heartbeat_check_seconds.max(1) as u64 * 3),
    );

    // Spawn the scan loop
    let scan_handle = {
        let cancel = cancel.clone();
        let scan = ScanLoop::new(Arc::clone(&store), Arc::clone(&reporter), &config);
        let interval = config.ping_interval_seconds;
        tokio::spawn(async move {
            tokio::select! {
                _ = scan.run(interval, scan_pulse) => {}
                _ = cancel.cancelled() => {}
            }
        })
    };

    // Spawn the periodic heartbeat
    let heartbeat_handle = {
        let cancel = cancel.clone();
        let reporter = Arc::clone(&reporter);
        let store = Arc::clone(&store);
        let interval = config.heartbeat_interval_seconds;
        tokio::spawn(async move {
            tokio::select! {
                _ = reporter.run_heartbeat_loop(store, interval, heartbeat_pulse) => {}
                _ = cancel.cancelled() => {}
            }
        })
    };

    // Spawn the summary retry loop
    let retry_handle = {
        let cancel = cancel.clone();
        let reporter = Arc::clone(&reporter);
        let store = Arc::clone(&store);
        let interval = config.retry_interval_seconds;
        tokio::spawn(async move {
            tokio::select! {
                _ = reporter.run_retry_loop(store, interval, retry_pulse) => {}
                _ = cancel.cancelled() => {}
            }
        })
    };

    // Spawn the hourly summariser
    let summariser_handle = {
        let cancel = cancel.clone();
        let store = Arc::clone(&store);
        let reporter = Arc::clone(&reporter);
        tokio::spawn(async move {
            tokio::select! {
                _ = summariser::run(store, reporter, summariser_pulse) => {}
                _ = cancel.cancelled() => {}
            }
        })
    };

    // Spawn the self-heartbeat writer
    let self_heartbeat_handle = {
        let cancel = cancel.clone();
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::select! {
                _ = self_heartbeat::run(store, self_heartbeat_pulse) => {}
                _ = cancel.cancelled() => {}
            }
        })
    };

    // Spawn the periodic outage safeguard
    let outage_handle = {
        let cancel = cancel.clone();
        let store = Arc::clone(&store);
        let check_secs = config.system_heartbeat_check_seconds;
        let threshold = config.offline_threshold_seconds;
        tokio::spawn(async move {
            tokio::select! {
                _ = outage::run(store, check_secs, threshold, outage_pulse) => {}
                _ = cancel.cancelled() => {}
            }
        })
    };

    // Spawn the watchdog
    let watchdog_handle = tokio::spawn(watchdog::run(vec![
        scan_monitor,
        heartbeat_monitor,
        retry_monitor,
        summariser_monitor,
        self_heartbeat_monitor,
        outage_monitor,
    ]));

    info!("Agent running");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    // Stop accepting new ticks; in-flight work drains at its next await.
    // A scan killed mid-sweep leaves its lock to expire on its own.
    cancel.cancel();

    scan_handle.abort();
    heartbeat_handle.abort();
    retry_handle.abort();
    summariser_handle.abort();
    self_heartbeat_handle.abort();
    outage_handle.abort();
    watchdog_handle.abort();

    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config() -> AgentConfig {
    AgentConfig {
        site_id: "site-test".to_string(),
        cloud_api_url: "http://127.0.0.1:9".to_string(),
        agent_auth_token: "token".to_string(),
        network_interface: "eth0".to_string(),
        subnet: "192.168.1.0/24".to_string(),
        ping_interval_seconds: 60,
        offline_failure_count: 2,
        offline_threshold_seconds: 15,
        ping_lock_timeout_seconds: 60,
        system_heartbeat_check_seconds: 120,
        heartbeat_interval_seconds: 300,
        retry_interval_seconds: 900,
        database_path: PathBuf::from("unused.db"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AgentConfig::try_parse_from([
            "presence-agent",
            "--site-id",
            "site-1",
            "--cloud-api-url",
            "https://cloud.example.com",
            "--agent-auth-token",
            "secret",
            "--network-interface",
            "eth0",
            "--subnet",
            "192.168.1.0/24",
        ])
        .expect("parse");

        assert_eq!(config.ping_interval_seconds, 60);
        assert_eq!(config.offline_failure_count, 2);
        assert_eq!(config.offline_threshold_seconds, 15);
        assert_eq!(config.ping_lock_timeout_seconds, 60);
        assert_eq!(config.system_heartbeat_check_seconds, 120);
        assert_eq!(config.heartbeat_interval_seconds, 300);
        assert_eq!(config.retry_interval_seconds, 900);
        assert_eq!(config.database_path, PathBuf::from("presence.db"));
    }
}
