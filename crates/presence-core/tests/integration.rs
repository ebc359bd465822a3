//! Integration tests for the presence-core crate.
//!
//! These tests exercise the public API across module boundaries: sweep
//! output flows through MAC extraction into the tracker, transitions are
//! accumulated into a state-change log, and the log feeds the hour-window
//! span computation -- verifying the invariants that hold end to end.

use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};

use presence_core::mac::{extract_macs, normalise};
use presence_core::model::{StateChange, Status};
use presence_core::summary::{presence_span, HourWindow};
use presence_core::tracker::PresenceTracker;

// ---------------------------------------------------------------------------
// Helpers -- a minimal in-memory state-change log
// ---------------------------------------------------------------------------

struct Log {
    rows: Vec<StateChange>,
}

impl Log {
    fn new() -> Self {
        Self { rows: Vec::new() }
    }

    fn latest(&self, employee_id: i64) -> Option<Status> {
        self.rows
            .iter()
            .rev()
            .find(|sc| sc.employee_id == employee_id)
            .map(|sc| sc.status)
    }

    fn append(&mut self, employee_id: i64, ts: DateTime<Utc>, status: Status) {
        self.rows.push(StateChange {
            id: self.rows.len() as i64 + 1,
            device_id: 1,
            employee_id,
            timestamp: ts,
            status,
            created_at: ts,
        });
    }

    /// Consecutive rows per employee must alternate status.
    fn assert_alternation(&self) {
        for employee_id in self.rows.iter().map(|sc| sc.employee_id) {
            let statuses: Vec<Status> = self
                .rows
                .iter()
                .filter(|sc| sc.employee_id == employee_id)
                .map(|sc| sc.status)
                .collect();
            for pair in statuses.windows(2) {
                assert_ne!(pair[0], pair[1], "consecutive rows must alternate");
            }
        }
    }
}

fn tick(
    tracker: &mut PresenceTracker,
    log: &mut Log,
    employee_id: i64,
    any_online: bool,
    ts: DateTime<Utc>,
) {
    if let Some(status) = tracker.observe(employee_id, any_online, log.latest(employee_id)) {
        log.append(employee_id, ts, status);
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// 1. Sweep output -> tracker -> log, cold start
// ---------------------------------------------------------------------------

#[test]
fn cold_start_single_device_goes_online() {
    let stdout = "192.168.1.10\tAA:BB:CC:DD:EE:01\tVendor\n";
    let wanted: HashSet<String> = [normalise("aa:bb:cc:dd:ee:01").unwrap()].into();
    let online = extract_macs(stdout, &wanted);
    assert_eq!(online.len(), 1);

    let mut tracker = PresenceTracker::new(2);
    let mut log = Log::new();
    tick(&mut tracker, &mut log, 1, !online.is_empty(), t0());

    assert_eq!(log.rows.len(), 1);
    assert_eq!(log.rows[0].status, Status::Online);
}

// ---------------------------------------------------------------------------
// 2. Debounce boundary -- offline declared on the threshold tick only
// ---------------------------------------------------------------------------

#[test]
fn debounce_boundary_writes_exactly_one_offline() {
    let mut tracker = PresenceTracker::new(2);
    let mut log = Log::new();
    let step = Duration::seconds(60);

    tick(&mut tracker, &mut log, 1, true, t0());
    assert_eq!(log.rows.len(), 1);

    // Three consecutive empty sweeps with a threshold of two:
    // tick 1 writes nothing, tick 2 writes OFFLINE, tick 3 writes nothing.
    tick(&mut tracker, &mut log, 1, false, t0() + step);
    assert_eq!(log.rows.len(), 1);
    tick(&mut tracker, &mut log, 1, false, t0() + step * 2);
    assert_eq!(log.rows.len(), 2);
    assert_eq!(log.rows[1].status, Status::Offline);
    tick(&mut tracker, &mut log, 1, false, t0() + step * 3);
    assert_eq!(log.rows.len(), 2);

    log.assert_alternation();
}

// ---------------------------------------------------------------------------
// 3. Flapping device -- alternation invariant holds across a long run
// ---------------------------------------------------------------------------

#[test]
fn flapping_employee_keeps_alternating_log() {
    let mut tracker = PresenceTracker::new(2);
    let mut log = Log::new();
    let step = Duration::seconds(60);

    // Pseudo-random but deterministic presence pattern
    let pattern = [
        true, true, false, true, false, false, false, true, false, false, false, false, true,
        true, false, true,
    ];
    for (i, &seen) in pattern.iter().enumerate() {
        tick(&mut tracker, &mut log, 1, seen, t0() + step * i as i32);
    }

    assert!(!log.rows.is_empty());
    log.assert_alternation();
    // The pattern ends with a sighting, so the log must end online
    assert_eq!(log.latest(1), Some(Status::Online));
}

// ---------------------------------------------------------------------------
// 4. Log -> hour window -> presence span
// ---------------------------------------------------------------------------

#[test]
fn scan_transitions_feed_full_hour_summary() {
    let mut tracker = PresenceTracker::new(2);
    let mut log = Log::new();

    // Online ten minutes before the window opens, quiet afterwards
    tick(&mut tracker, &mut log, 1, true, t0() - Duration::minutes(10));

    let window = HourWindow::starting_at(t0());
    let was_online_at_start = log
        .rows
        .iter()
        .rev()
        .find(|sc| sc.timestamp < window.start)
        .map(|sc| sc.status == Status::Online)
        .unwrap_or(false);
    let in_window: Vec<StateChange> = log
        .rows
        .iter()
        .filter(|sc| sc.timestamp >= window.start && sc.timestamp < window.end)
        .cloned()
        .collect();

    let span = presence_span(window, was_online_at_start, &in_window).unwrap();
    assert_eq!(span.first_seen, window.start);
    assert_eq!(span.last_seen, window.end);
    assert_eq!(span.minutes_online, 60);
}

#[test]
fn scan_transitions_feed_partial_hour_summary() {
    let mut tracker = PresenceTracker::new(1);
    let mut log = Log::new();
    let window = HourWindow::starting_at(t0());

    // Arrives at 9:10, last reply at 9:40, declared offline there
    tick(&mut tracker, &mut log, 1, true, t0() + Duration::minutes(10));
    tick(&mut tracker, &mut log, 1, false, t0() + Duration::minutes(40));

    let span = presence_span(window, false, &log.rows).unwrap();
    assert_eq!(span.first_seen, t0() + Duration::minutes(10));
    assert_eq!(span.last_seen, t0() + Duration::minutes(40));
    assert_eq!(span.minutes_online, 30);
}

// ---------------------------------------------------------------------------
// 5. Probe failure -- an empty sweep is absorbed by the debounce window
// ---------------------------------------------------------------------------

#[test]
fn failed_sweep_is_indistinguishable_from_everyone_offline() {
    let wanted: HashSet<String> = [normalise("aa:bb:cc:dd:ee:01").unwrap()].into();
    // Tool failure yields empty stdout, which parses to the empty set
    let online = extract_macs("", &wanted);
    assert!(online.is_empty());

    let mut tracker = PresenceTracker::new(2);
    let mut log = Log::new();
    tick(&mut tracker, &mut log, 1, true, t0());

    // One failed sweep: still online, no offline row written
    tick(&mut tracker, &mut log, 1, online.contains("aa:bb:cc:dd:ee:01"), t0() + Duration::seconds(60));
    assert_eq!(log.rows.len(), 1);
    assert_eq!(log.latest(1), Some(Status::Online));
}
