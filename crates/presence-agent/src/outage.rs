/// Agent outage detection.
///
/// The self-heartbeat row is the agent's own pulse. A stale pulse on
/// startup (or during the periodic safeguard) means the host was down --
/// power cut, crash, whatever. Lost time is recorded as an explicit
/// downtime interval, never reconstructed: employees who were online get
/// a synthetic offline row shortly after the last pulse, crediting a
/// brief trailing online period instead of stretching presence across
/// dead time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use presence_core::model::Status;

use crate::scheduler::TaskPulse;
use crate::store::Store;

/// Check the self-heartbeat once. Returns the recorded downtime interval,
/// if one was detected. Always leaves the heartbeat fresh.
pub fn check(
    store: &Store,
    now: DateTime<Utc>,
    check_secs: i64,
    offline_threshold_secs: i64,
) -> anyhow::Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let Some(last) = store.read_system_heartbeat()? else {
        // First boot: seed the row so the next check has a baseline
        store.touch_system_heartbeat(now)?;
        return Ok(None);
    };

    let gap = (now - last).num_seconds();
    if gap <= check_secs {
        store.touch_system_heartbeat(now)?;
        return Ok(None);
    }

    warn!(gap_secs = gap, "Stale self-heartbeat, recording agent downtime");
    store.append_agent_downtime(last, now)?;

    let offline_at = last + Duration::seconds(offline_threshold_secs);
    for entry in store.list_employees_with_devices_and_latest_state()? {
        let Some(latest) = entry.latest_state else {
            continue;
        };
        if latest.status != Status::Online {
            continue;
        }
        store.append_state_change(latest.device_id, entry.employee.id, offline_at, Status::Offline)?;
        info!(
            employee = %entry.employee.fake_name,
            at = %offline_at,
            "Marked offline after outage"
        );
    }

    store.touch_system_heartbeat(now)?;
    Ok(Some((last, now)))
}

/// Periodic safeguard: catches the pathological case where the
/// self-heartbeat task itself dies while the rest of the agent lives on.
pub async fn run(store: Arc<Store>, check_secs: i64, offline_threshold_secs: i64, pulse: TaskPulse) {
    info!(check_secs, "Outage detector started");
    let period = std::time::Duration::from_secs(check_secs.max(1) as u64);
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        pulse.tick();
        if let Err(e) = check(&store, Utc::now(), check_secs, offline_threshold_secs) {
            warn!(error = %e, "Outage check failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn seeded() -> (Store, i64, i64) {
        let store = Store::open_in_memory().expect("store");
        let e1 = store.insert_employee("Ada", "Falcon", 1).unwrap();
        let d1 = store
            .insert_device(e1, "192.168.1.10", Some("aa:bb:cc:dd:ee:01"), "Laptop")
            .unwrap();
        (store, e1, d1)
    }

    #[test]
    fn test_first_boot_seeds_heartbeat() {
        let (store, _, _) = seeded();
        let result = check(&store, t0(), 120, 15).unwrap();
        assert!(result.is_none());
        assert_eq!(store.read_system_heartbeat().unwrap(), Some(t0()));
    }

    #[test]
    fn test_fresh_heartbeat_is_quiet() {
        let (store, e1, d1) = seeded();
        store.append_state_change(d1, e1, t0(), Status::Online).unwrap();
        store.touch_system_heartbeat(t0()).unwrap();

        let now = t0() + Duration::seconds(30);
        assert!(check(&store, now, 120, 15).unwrap().is_none());
        assert!(store.list_unsynced_downtimes().unwrap().is_empty());
        // Heartbeat refreshed even on the quiet path
        assert_eq!(store.read_system_heartbeat().unwrap(), Some(now));
    }

    #[test]
    fn test_outage_recovery() {
        let (store, e1, d1) = seeded();
        store.append_state_change(d1, e1, t0(), Status::Online).unwrap();
        store.touch_system_heartbeat(t0()).unwrap();

        // Restart ten minutes later with a 120s staleness threshold
        let now = t0() + Duration::minutes(10);
        let recorded = check(&store, now, 120, 15).unwrap();
        assert_eq!(recorded, Some((t0(), now)));

        let downtimes = store.list_unsynced_downtimes().unwrap();
        assert_eq!(downtimes.len(), 1);
        assert_eq!(downtimes[0].downtime_start, t0());
        assert_eq!(downtimes[0].downtime_end, now);

        // Synthetic offline at last pulse + threshold, not at restart time
        let latest = store.latest_state_change(e1).unwrap().unwrap();
        assert_eq!(latest.status, Status::Offline);
        assert_eq!(latest.timestamp, t0() + Duration::seconds(15));
        assert_eq!(latest.device_id, d1);

        assert_eq!(store.read_system_heartbeat().unwrap(), Some(now));
    }

    #[test]
    fn test_outage_skips_employees_already_offline() {
        let (store, e1, d1) = seeded();
        store.append_state_change(d1, e1, t0(), Status::Online).unwrap();
        store
            .append_state_change(d1, e1, t0() + Duration::minutes(1), Status::Offline)
            .unwrap();
        store.touch_system_heartbeat(t0() + Duration::minutes(2)).unwrap();

        let now = t0() + Duration::minutes(30);
        assert!(check(&store, now, 120, 15).unwrap().is_some());

        // No synthetic row: the log still ends with the natural offline
        let changes = store
            .state_changes_in_range(e1, t0(), now + Duration::hours(1))
            .unwrap();
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_repeated_checks_record_one_downtime() {
        let (store, _, _) = seeded();
        store.touch_system_heartbeat(t0()).unwrap();

        let now = t0() + Duration::minutes(10);
        assert!(check(&store, now, 120, 15).unwrap().is_some());
        // The heartbeat was refreshed, so an immediate re-check is quiet
        assert!(check(&store, now + Duration::seconds(1), 120, 15).unwrap().is_none());
        assert_eq!(store.list_unsynced_downtimes().unwrap().len(), 1);
    }
}
