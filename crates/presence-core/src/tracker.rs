/// Debounced presence tracking.
///
/// A single missed sweep does not mean an employee left the building --
/// ARP replies get lost, phones doze, the sweep tool can fail outright.
/// The tracker counts consecutive empty sweeps per employee and only
/// reports an offline transition once the failure threshold is reached.
/// Counters are process-local and deliberately lost on restart; the worst
/// case after a restart is one extra grace period before going offline.

use std::collections::HashMap;

use crate::model::Status;

pub struct PresenceTracker {
    offline_failure_count: u32,
    failures: HashMap<i64, u32>,
}

impl PresenceTracker {
    pub fn new(offline_failure_count: u32) -> Self {
        Self {
            // A threshold of zero would fire before the first sweep ran.
            offline_failure_count: offline_failure_count.max(1),
            failures: HashMap::new(),
        }
    }

    /// Feed one sweep observation for one employee. `latest` is the status
    /// of the employee's most recent state-change row (None = no history).
    /// Returns the transition to append, if any.
    pub fn observe(
        &mut self,
        employee_id: i64,
        any_device_online: bool,
        latest: Option<Status>,
    ) -> Option<Status> {
        if any_device_online {
            self.failures.remove(&employee_id);
            match latest {
                None | Some(Status::Offline) => Some(Status::Online),
                Some(Status::Online) => None,
            }
        } else {
            let count = self.failures.entry(employee_id).or_insert(0);
            *count += 1;
            if *count >= self.offline_failure_count {
                self.failures.remove(&employee_id);
                if latest == Some(Status::Online) {
                    return Some(Status::Offline);
                }
            }
            None
        }
    }

    /// Current consecutive-failure count for an employee.
    pub fn failure_count(&self, employee_id: i64) -> u32 {
        self.failures.get(&employee_id).copied().unwrap_or(0)
    }
}
