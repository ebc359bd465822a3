/// Hour windows and the presence-span policy.
///
/// A window is the half-open interval `[H, H+1h)` where `H` has
/// minute = second = 0. `minutes_online` is the span between first and
/// last sighting within the window -- not the sum of online intervals.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::model::{StateChange, Status};

/// Truncate a timestamp to its whole-hour boundary.
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    Utc.timestamp_opt(secs - secs.rem_euclid(3600), 0)
        .single()
        .unwrap_or(ts)
}

/// Half-open hour window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HourWindow {
    /// The window starting at `start` (must already be hour-aligned).
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start + Duration::hours(1),
        }
    }

    /// The most recent closed window as of `now`.
    pub fn previous(now: DateTime<Utc>) -> Self {
        let end = truncate_to_hour(now);
        Self {
            start: end - Duration::hours(1),
            end,
        }
    }
}

/// Computed presence span for one employee over one closed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSpan {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub minutes_online: i64,
}

/// Apply the presence-span policy to one employee's hour.
///
/// `was_online_at_start` reflects the latest state change strictly before
/// the window; `changes` are the window's rows in ascending timestamp
/// order. Returns `None` when the employee contributes no summary row
/// (offline the whole hour).
pub fn presence_span(
    window: HourWindow,
    was_online_at_start: bool,
    changes: &[StateChange],
) -> Option<PresenceSpan> {
    let (first_seen, last_seen) = if let (Some(first), Some(last)) = (changes.first(), changes.last()) {
        let first_seen = if was_online_at_start {
            window.start
        } else {
            first.timestamp
        };
        let last_seen = if last.status == Status::Online {
            window.end
        } else {
            last.timestamp
        };
        (first_seen, last_seen)
    } else if was_online_at_start {
        (window.start, window.end)
    } else {
        return None;
    };

    Some(PresenceSpan {
        first_seen,
        last_seen,
        minutes_online: span_minutes(first_seen, last_seen),
    })
}

/// Span in minutes, rounded to nearest, clamped to a single hour.
fn span_minutes(first_seen: DateTime<Utc>, last_seen: DateTime<Utc>) -> i64 {
    let secs = (last_seen - first_seen).num_seconds();
    ((secs as f64 / 60.0).round() as i64).clamp(0, 60)
}
