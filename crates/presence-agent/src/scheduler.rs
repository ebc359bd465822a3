/// Task liveness plumbing and timing helpers for the periodic workers.
///
/// Every long-running task holds a `TaskPulse` and ticks it each loop
/// iteration; the watchdog holds the matching `TaskMonitor`s. Unlike a
/// fixed liveness window, each monitor carries its own timeout because
/// the workers run on wildly different cadences (seconds to an hour).

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

// ── Task pulse / monitor ────────────────────────────────────────────────

/// Sending half -- held by the monitored task. Call `tick()` on every
/// loop iteration.
#[derive(Clone)]
pub struct TaskPulse {
    tx: watch::Sender<Instant>,
}

impl TaskPulse {
    pub fn tick(&self) {
        let _ = self.tx.send(Instant::now());
    }
}

/// Receiving half -- held by the watchdog.
pub struct TaskMonitor {
    pub name: String,
    timeout: Duration,
    rx: watch::Receiver<Instant>,
}

impl TaskMonitor {
    /// How long ago the task last pulsed.
    pub fn elapsed(&self) -> Duration {
        self.rx.borrow().elapsed()
    }

    /// Whether the task pulsed within its own liveness window.
    pub fn is_alive(&self) -> bool {
        self.elapsed() < self.timeout
    }
}

/// Create a matched pulse/monitor pair for a named task.
pub fn task_pulse(name: impl Into<String>, timeout: Duration) -> (TaskPulse, TaskMonitor) {
    let (tx, rx) = watch::channel(Instant::now());
    (
        TaskPulse { tx },
        TaskMonitor {
            name: name.into(),
            timeout,
            rx,
        },
    )
}

// ── Timing helpers ──────────────────────────────────────────────────────

/// Time until the next top of the hour, plus a little slack so the
/// summariser never fires inside the hour it is about to close.
pub fn until_next_hour(now: DateTime<Utc>) -> Duration {
    let secs = 3600 - now.timestamp().rem_euclid(3600);
    Duration::from_secs(secs as u64 + 2)
}

/// Sleep for `total`, pulsing every few seconds so long waits don't trip
/// the watchdog.
pub async fn sleep_pulsing(total: Duration, pulse: &TaskPulse) {
    const SLICE: Duration = Duration::from_secs(15);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        let step = remaining.min(SLICE);
        tokio::time::sleep(step).await;
        pulse.tick();
        remaining = remaining.saturating_sub(step);
    }
}

/// Small startup delay so co-located agents booted by the same power
/// event don't sweep in lockstep. Seeded from the clock, like the
/// client-id generator -- not worth a rand dependency.
pub fn startup_jitter(max: Duration) -> Duration {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mixed = seed ^ (seed >> 16);
    Duration::from_millis(mixed % (max.as_millis() as u64).max(1))
}
