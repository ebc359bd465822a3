use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Presence status --

/// Observable status of an employee, carried by every state-change row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Offline = 0,
    Online = 1,
}

impl Status {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Offline),
            1 => Some(Self::Online),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

// -- Roster entities --

/// A person whose presence is tracked. The real name never leaves the
/// local network; the pseudonym is the externally visible identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub employee_name: String,
    pub fake_name: String,
    pub display_order: i64,
}

/// A network endpoint (IP + optional MAC) attributed to one employee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub employee_id: i64,
    pub ip_address: String,
    pub mac_address: Option<String>,
    pub device_name: String,
}

// -- Event log --

/// One row of the append-only state-change log. `timestamp` is event time;
/// `created_at` is write time. For synthetic offline rows written during
/// outage recovery, `timestamp` lags `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub id: i64,
    pub device_id: i64,
    pub employee_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

// -- Aggregates --

/// Per-employee presence aggregate for one closed hour window.
/// At most one row per (employee, hour); `synced` flips once delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlySummary {
    pub id: i64,
    pub employee_id: i64,
    pub hour: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub minutes_online: i64,
    pub synced: bool,
}

/// An interval during which the agent itself was down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDowntime {
    pub id: i64,
    pub downtime_start: DateTime<Utc>,
    pub downtime_end: DateTime<Utc>,
    pub synced: bool,
}

// -- Roster view --

/// One employee with their devices and latest state-change row, as loaded
/// at the start of every scan tick.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub employee: Employee,
    pub devices: Vec<Device>,
    pub latest_state: Option<StateChange>,
}

impl RosterEntry {
    /// Current status: the status of the most recent state change, or
    /// `Offline` if the employee has no history yet.
    pub fn current_status(&self) -> Status {
        self.latest_state
            .as_ref()
            .map(|sc| sc.status)
            .unwrap_or(Status::Offline)
    }

    /// Timestamp of the latest state change, regardless of direction.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.latest_state.as_ref().map(|sc| sc.timestamp)
    }
}
