/// Self-heartbeat writer.
///
/// Touches the singleton system-status row every 30 seconds. The row
/// carries no meaning beyond letting the outage detector answer "how
/// long was I dead?" after a restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use presence_core::SELF_HEARTBEAT_INTERVAL_SECONDS;

use crate::scheduler::TaskPulse;
use crate::store::Store;

pub async fn run(store: Arc<Store>, pulse: TaskPulse) {
    info!(interval_secs = SELF_HEARTBEAT_INTERVAL_SECONDS, "Self-heartbeat started");
    let mut interval = tokio::time::interval(Duration::from_secs(SELF_HEARTBEAT_INTERVAL_SECONDS));
    loop {
        interval.tick().await;
        pulse.tick();
        if let Err(e) = store.touch_system_heartbeat(Utc::now()) {
            // Transient store trouble: the next tick retries
            warn!(error = %e, "Failed to write self-heartbeat");
        }
    }
}
