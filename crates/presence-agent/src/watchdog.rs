/// Watchdog task -- logs workers that stop pulsing.
///
/// Purely observational: a wedged worker is surfaced in the logs, never
/// restarted. The scan lock's TTL already guarantees a crashed scanner
/// cannot wedge the rest of the system.

use std::time::Duration;

use tracing::{info, warn};

use crate::scheduler::TaskMonitor;

/// How often the watchdog checks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

pub async fn run(monitors: Vec<TaskMonitor>) {
    info!(tasks = monitors.len(), "Watchdog started");

    let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);

    loop {
        interval.tick().await;

        for monitor in &monitors {
            if !monitor.is_alive() {
                warn!(
                    task = %monitor.name,
                    silent_ms = monitor.elapsed().as_millis() as u64,
                    "Task appears unresponsive"
                );
            }
        }
    }
}
