/// The scan loop: one layer-2 sweep per tick, debounced into state
/// transitions.
///
/// Each tick: try the TTL'd scan lock (skip the tick if another scan --
/// possibly in another agent process -- still holds it), re-read the
/// roster, sweep the subnet, feed the tracker, append transitions in
/// roster order, and push a heartbeat if anything changed. Overlapping
/// ticks are dropped, never queued.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use presence_core::mac;
use presence_core::model::{RosterEntry, Status};
use presence_core::tracker::PresenceTracker;
use presence_core::SCAN_LOCK_NAME;

use crate::reporter::Reporter;
use crate::scheduler::TaskPulse;
use crate::store::Store;
use crate::AgentConfig;

pub struct ScanLoop {
    store: Arc<Store>,
    reporter: Arc<Reporter>,
    /// Per-employee failure counters. Process-local, touched only inside
    /// the scan lock, lost on restart (worst case: one extra grace period).
    tracker: PresenceTracker,
    interface: String,
    subnet: String,
    lock_ttl_secs: i64,
}

impl ScanLoop {
    pub fn new(store: Arc<Store>, reporter: Arc<Reporter>, config: &AgentConfig) -> Self {
        Self {
            store,
            reporter,
            tracker: PresenceTracker::new(config.offline_failure_count),
            interface: config.network_interface.clone(),
            subnet: config.subnet.clone(),
            lock_ttl_secs: config.ping_lock_timeout_seconds,
        }
    }

    pub async fn run(mut self, interval_secs: u64, pulse: TaskPulse) {
        info!(interval_secs, subnet = %self.subnet, "Scan loop started");
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            pulse.tick();
            if let Err(e) = self.tick().await {
                // Next tick retries from a fresh roster read
                warn!(error = %e, "Scan tick failed");
            }
        }
    }

    /// One scan tick. Returns the number of transitions appended
    /// (zero when the lock was contended).
    async fn tick(&mut self) -> anyhow::Result<usize> {
        if !self
            .store
            .try_acquire_lock(SCAN_LOCK_NAME, self.lock_ttl_secs, Utc::now())?
        {
            debug!("Previous scan still holds the lock, skipping tick");
            return Ok(0);
        }
        let result = self.scan().await;
        self.store.release_lock(SCAN_LOCK_NAME)?;
        result
    }

    async fn scan(&mut self) -> anyhow::Result<usize> {
        let started = std::time::Instant::now();

        let roster = self.store.list_employees_with_devices_and_latest_state()?;
        let wanted = known_macs(&roster);
        let online_macs = crate::prober::sweep(&self.interface, &self.subnet, &wanted).await;

        let changes = self.apply(&roster, &online_macs)?;
        if changes > 0 {
            // All appends land before the heartbeat goes out
            self.reporter.send_heartbeat(&self.store).await;
        }

        info!(
            changes,
            online = online_macs.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Scan complete"
        );
        Ok(changes)
    }

    /// Apply one sweep result to the roster. An employee is online iff
    /// any of their devices answered; the appended row references the
    /// device that satisfied the probe (first in scan order), or for
    /// offline transitions the device that carried the last online row.
    fn apply(
        &mut self,
        roster: &[RosterEntry],
        online_macs: &HashSet<String>,
    ) -> anyhow::Result<usize> {
        let now = Utc::now();
        let mut changes = 0;

        for entry in roster {
            let online_device = entry.devices.iter().find(|d| {
                d.mac_address
                    .as_deref()
                    .and_then(mac::normalise)
                    .map(|m| online_macs.contains(&m))
                    .unwrap_or(false)
            });
            let latest = entry.latest_state.as_ref().map(|sc| sc.status);

            let Some(transition) =
                self.tracker
                    .observe(entry.employee.id, online_device.is_some(), latest)
            else {
                continue;
            };

            let device_id = match transition {
                Status::Online => online_device.map(|d| d.id),
                Status::Offline => entry.latest_state.as_ref().map(|sc| sc.device_id),
            };
            let Some(device_id) = device_id else { continue };

            if self
                .store
                .append_state_change(device_id, entry.employee.id, now, transition)?
            {
                changes += 1;
                info!(
                    employee = %entry.employee.fake_name,
                    online = transition.is_online(),
                    "Presence changed"
                );
            }
        }

        Ok(changes)
    }
}

/// Union of the roster's known MACs, normalised to canonical form.
fn known_macs(roster: &[RosterEntry]) -> HashSet<String> {
    roster
        .iter()
        .flat_map(|entry| entry.devices.iter())
        .filter_map(|d| d.mac_address.as_deref())
        .filter_map(mac::normalise)
        .collect()
}
