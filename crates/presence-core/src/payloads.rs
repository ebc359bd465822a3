/// Cloud wire bodies.
///
/// Both endpoints take camelCase JSON with a bearer token. The heartbeat
/// enumerates the entire roster, not only whoever is online; the cloud
/// learns everyone's status on every beat. `employeeName` deliberately
/// carries the pseudonym -- the real name never leaves the site.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AgentDowntime, Employee, HourlySummary, Status};
use crate::DEFAULT_AREA;

// -- POST /api/heartbeat --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub site_id: String,
    pub timestamp: String,
    pub devices_online: Vec<EmployeePresence>,
}

impl HeartbeatPayload {
    pub fn new(site_id: &str, now: DateTime<Utc>, entries: Vec<EmployeePresence>) -> Self {
        Self {
            site_id: site_id.to_string(),
            timestamp: now.to_rfc3339(),
            devices_online: entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeePresence {
    pub employee_id: i64,
    pub employee_name: String,
    pub fake_name: String,
    pub area: String,
    pub is_present: bool,
    pub last_seen: Option<String>,
}

impl EmployeePresence {
    pub fn new(employee: &Employee, status: Status, last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            employee_id: employee.id,
            employee_name: employee.fake_name.clone(),
            fake_name: employee.fake_name.clone(),
            area: DEFAULT_AREA.to_string(),
            is_present: status.is_online(),
            last_seen: last_seen.map(|ts| ts.to_rfc3339()),
        }
    }
}

// -- POST /api/presence --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub site_id: String,
    pub timestamp: String,
    /// Exactly one record per POST
    pub presence_data: Vec<PresenceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_downtimes: Option<Vec<DowntimeRecord>>,
}

impl PresencePayload {
    pub fn new(
        site_id: &str,
        now: DateTime<Utc>,
        record: PresenceRecord,
        downtimes: Option<Vec<DowntimeRecord>>,
    ) -> Self {
        Self {
            site_id: site_id.to_string(),
            timestamp: now.to_rfc3339(),
            presence_data: vec![record],
            agent_downtimes: downtimes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub employee_id: i64,
    pub employee_name: String,
    pub fake_name: String,
    pub date: String,
    pub hour: u32,
    pub first_seen: String,
    pub last_seen: String,
    pub minutes_online: i64,
}

impl PresenceRecord {
    pub fn new(employee: &Employee, summary: &HourlySummary) -> Self {
        Self {
            employee_id: employee.id,
            employee_name: employee.fake_name.clone(),
            fake_name: employee.fake_name.clone(),
            date: summary.hour.format("%Y-%m-%d").to_string(),
            hour: summary.hour.hour(),
            first_seen: summary.first_seen.format("%H:%M:%S").to_string(),
            last_seen: summary.last_seen.format("%H:%M:%S").to_string(),
            minutes_online: summary.minutes_online,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DowntimeRecord {
    pub downtime_start: String,
    pub downtime_end: String,
}

impl From<&AgentDowntime> for DowntimeRecord {
    fn from(dt: &AgentDowntime) -> Self {
        Self {
            downtime_start: dt.downtime_start.to_rfc3339(),
            downtime_end: dt.downtime_end.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn employee() -> Employee {
        Employee {
            id: 42,
            employee_name: "Grace Hopper".into(),
            fake_name: "Heron".into(),
            display_order: 3,
        }
    }

    #[test]
    fn test_heartbeat_uses_pseudonym_and_camel_case() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
        let entry = EmployeePresence::new(&employee(), Status::Online, Some(now));
        let payload = HeartbeatPayload::new("site-7", now, vec![entry]);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["siteId"], "site-7");
        let emp = &json["devicesOnline"][0];
        assert_eq!(emp["employeeId"], 42);
        // The pseudonym is the externally visible identity
        assert_eq!(emp["employeeName"], "Heron");
        assert_eq!(emp["fakeName"], "Heron");
        assert_eq!(emp["area"], "default");
        assert_eq!(emp["isPresent"], true);
        assert_eq!(emp["lastSeen"], "2025-06-01T09:30:00+00:00");
    }

    #[test]
    fn test_heartbeat_offline_entry_has_null_last_seen() {
        let entry = EmployeePresence::new(&employee(), Status::Offline, None);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["isPresent"], false);
        assert!(json["lastSeen"].is_null());
    }

    #[test]
    fn test_presence_record_formats() {
        let hour = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
        let summary = HourlySummary {
            id: 1,
            employee_id: 42,
            hour,
            first_seen: Utc.with_ymd_and_hms(2025, 6, 1, 14, 10, 0).unwrap(),
            last_seen: Utc.with_ymd_and_hms(2025, 6, 1, 14, 40, 0).unwrap(),
            minutes_online: 30,
            synced: false,
        };
        let record = PresenceRecord::new(&employee(), &summary);
        assert_eq!(record.date, "2025-06-01");
        assert_eq!(record.hour, 14);
        assert_eq!(record.first_seen, "14:10:00");
        assert_eq!(record.last_seen, "14:40:00");
        assert_eq!(record.minutes_online, 30);
        assert_eq!(record.employee_name, "Heron");
    }

    #[test]
    fn test_presence_payload_omits_absent_downtimes() {
        let hour = Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap();
        let summary = HourlySummary {
            id: 1,
            employee_id: 42,
            hour,
            first_seen: hour,
            last_seen: hour,
            minutes_online: 0,
            synced: false,
        };
        let record = PresenceRecord::new(&employee(), &summary);
        let payload = PresencePayload::new("site-7", hour, record, None);

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("agentDowntimes").is_none());
        assert_eq!(json["presenceData"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_downtime_record_from_model() {
        let dt = AgentDowntime {
            id: 1,
            downtime_start: Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            downtime_end: Utc.with_ymd_and_hms(2025, 6, 1, 8, 10, 0).unwrap(),
            synced: false,
        };
        let record = DowntimeRecord::from(&dt);
        assert_eq!(record.downtime_start, "2025-06-01T08:00:00+00:00");
        assert_eq!(record.downtime_end, "2025-06-01T08:10:00+00:00");

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("downtimeStart").is_some());
        assert!(json.get("downtimeEnd").is_some());
    }
}
