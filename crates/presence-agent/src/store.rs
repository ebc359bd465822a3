/// SQLite-backed store for all persisted state: roster, the append-only
/// state-change log, hourly summaries, agent downtimes, the self-heartbeat
/// singleton, and the TTL'd scan lock.
///
/// Timestamps are UTC epoch seconds in INTEGER columns; `DateTime<Utc>`
/// everywhere above this boundary. Every write is committed before the
/// method returns; reads are snapshot-consistent within a single call.
///
/// Roster rows (employees, devices) are administered by external
/// provisioning tooling against the same schema -- the insert methods here
/// exist for that tooling and for tests, the agent itself only reads them.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use presence_core::mac;
use presence_core::model::{
    AgentDowntime, Device, Employee, HourlySummary, RosterEntry, StateChange, Status,
};
use presence_core::summary::PresenceSpan;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employees (
    id            INTEGER PRIMARY KEY,
    employee_name TEXT NOT NULL UNIQUE,
    fake_name     TEXT NOT NULL,
    display_order INTEGER NOT NULL UNIQUE,
    created_at    INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS devices (
    id          INTEGER PRIMARY KEY,
    employee_id INTEGER NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
    ip_address  TEXT NOT NULL UNIQUE,
    mac_address TEXT,
    device_name TEXT NOT NULL DEFAULT 'Primary Device',
    created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS state_changes (
    id          INTEGER PRIMARY KEY,
    device_id   INTEGER NOT NULL REFERENCES devices(id),
    employee_id INTEGER NOT NULL REFERENCES employees(id),
    timestamp   INTEGER NOT NULL,
    status      INTEGER NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_state_changes_employee
    ON state_changes (employee_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_state_changes_device
    ON state_changes (device_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS hourly_summaries (
    id             INTEGER PRIMARY KEY,
    employee_id    INTEGER NOT NULL REFERENCES employees(id),
    hour           INTEGER NOT NULL,
    first_seen     INTEGER NOT NULL,
    last_seen      INTEGER NOT NULL,
    minutes_online INTEGER NOT NULL,
    synced         INTEGER NOT NULL DEFAULT 0,
    created_at     INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    UNIQUE (employee_id, hour)
);

CREATE TABLE IF NOT EXISTS system_status (
    key        TEXT PRIMARY KEY,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_downtimes (
    id             INTEGER PRIMARY KEY,
    downtime_start INTEGER NOT NULL,
    downtime_end   INTEGER NOT NULL,
    synced         INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS locks (
    name       TEXT PRIMARY KEY,
    expires_at INTEGER NOT NULL
);
";

/// Key of the single system-status row. Never a fixed rowid.
const SYSTEM_KEY: &str = "system";

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`. This is the only fatal
    /// failure in the agent: without the store there is nothing to do.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open store at {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    /// In-memory store, used by the test suite.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)
            .context("failed to create store schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ── Roster ──────────────────────────────────────────────────────────

    pub fn list_employees(&self) -> Result<Vec<Employee>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, employee_name, fake_name, display_order
             FROM employees ORDER BY display_order ASC",
        )?;
        let rows = stmt.query_map([], employee_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Each employee with their devices and single latest state-change row,
    /// in display order -- one snapshot-consistent read per scan tick.
    pub fn list_employees_with_devices_and_latest_state(&self) -> Result<Vec<RosterEntry>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut entries = Vec::new();
        {
            let mut employees = tx.prepare(
                "SELECT id, employee_name, fake_name, display_order
                 FROM employees ORDER BY display_order ASC",
            )?;
            let mut devices = tx.prepare(
                "SELECT id, employee_id, ip_address, mac_address, device_name
                 FROM devices WHERE employee_id = ?1 ORDER BY id ASC",
            )?;
            let mut latest = tx.prepare(
                "SELECT id, device_id, employee_id, timestamp, status, created_at
                 FROM state_changes WHERE employee_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
            )?;

            let rows = employees.query_map([], employee_from_row)?;
            for employee in rows {
                let employee = employee?;
                let devs = devices
                    .query_map(params![employee.id], device_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                let latest_state = latest
                    .query_row(params![employee.id], state_change_from_row)
                    .optional()?;
                entries.push(RosterEntry {
                    employee,
                    devices: devs,
                    latest_state,
                });
            }
        }
        tx.commit()?;
        Ok(entries)
    }

    pub fn insert_employee(&self, employee_name: &str, fake_name: &str, display_order: i64) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO employees (employee_name, fake_name, display_order) VALUES (?1, ?2, ?3)",
            params![employee_name, fake_name, display_order],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_device(
        &self,
        employee_id: i64,
        ip_address: &str,
        mac_address: Option<&str>,
        device_name: &str,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO devices (employee_id, ip_address, mac_address, device_name)
             VALUES (?1, ?2, ?3, ?4)",
            params![employee_id, ip_address, mac_address, device_name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_device_mac(&self, device_id: i64, mac_address: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE devices SET mac_address = ?2 WHERE id = ?1",
            params![device_id, mac_address],
        )?;
        Ok(())
    }

    /// Rewrite any stored MAC that is not in canonical form. MACs that
    /// fail to normalise are left untouched (the prober will never match
    /// them, which is the correct behaviour for junk). Returns how many
    /// rows were rewritten.
    pub fn normalise_device_macs(&self) -> Result<usize> {
        let raw: Vec<(i64, String)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, mac_address FROM devices
                 WHERE mac_address IS NOT NULL AND mac_address <> ''",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut rewritten = 0;
        for (id, stored) in raw {
            if let Some(canonical) = mac::normalise(&stored) {
                if canonical != stored {
                    self.update_device_mac(id, &canonical)?;
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }

    // ── State-change log ────────────────────────────────────────────────

    pub fn latest_state_change(&self, employee_id: i64) -> Result<Option<StateChange>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, device_id, employee_id, timestamp, status, created_at
                 FROM state_changes WHERE employee_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![employee_id],
                state_change_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Append a state change unless the employee's latest row already
    /// carries the same status (keeps consecutive rows alternating).
    /// Returns whether a row was inserted. Rows are never mutated or
    /// deleted afterwards.
    pub fn append_state_change(
        &self,
        device_id: i64,
        employee_id: i64,
        timestamp: DateTime<Utc>,
        status: Status,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let latest: Option<i64> = tx
            .query_row(
                "SELECT status FROM state_changes WHERE employee_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![employee_id],
                |row| row.get(0),
            )
            .optional()?;
        if latest == Some(status.as_i64()) {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO state_changes (device_id, employee_id, timestamp, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device_id,
                employee_id,
                timestamp.timestamp(),
                status.as_i64(),
                Utc::now().timestamp()
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// State changes for an employee within `[t0, t1)`, ascending.
    pub fn state_changes_in_range(
        &self,
        employee_id: i64,
        t0: DateTime<Utc>,
        t1: DateTime<Utc>,
    ) -> Result<Vec<StateChange>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, device_id, employee_id, timestamp, status, created_at
             FROM state_changes
             WHERE employee_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![employee_id, t0.timestamp(), t1.timestamp()],
            state_change_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Latest state change strictly before `t`.
    pub fn latest_state_change_before(
        &self,
        employee_id: i64,
        t: DateTime<Utc>,
    ) -> Result<Option<StateChange>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, device_id, employee_id, timestamp, status, created_at
                 FROM state_changes WHERE employee_id = ?1 AND timestamp < ?2
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![employee_id, t.timestamp()],
                state_change_from_row,
            )
            .optional()?;
        Ok(row)
    }

    // ── Hourly summaries ────────────────────────────────────────────────

    /// Insert or replace the summary for `(employee, hour)`. A replace
    /// overwrites the span fields and resets `synced` so the new numbers
    /// get delivered. Returns the stored row.
    pub fn upsert_hourly_summary(
        &self,
        employee_id: i64,
        hour: DateTime<Utc>,
        span: &PresenceSpan,
    ) -> Result<HourlySummary> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO hourly_summaries
                 (employee_id, hour, first_seen, last_seen, minutes_online, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)
             ON CONFLICT (employee_id, hour) DO UPDATE SET
                 first_seen = excluded.first_seen,
                 last_seen = excluded.last_seen,
                 minutes_online = excluded.minutes_online,
                 synced = 0",
            params![
                employee_id,
                hour.timestamp(),
                span.first_seen.timestamp(),
                span.last_seen.timestamp(),
                span.minutes_online
            ],
        )?;
        let row = conn.query_row(
            "SELECT id, employee_id, hour, first_seen, last_seen, minutes_online, synced
             FROM hourly_summaries WHERE employee_id = ?1 AND hour = ?2",
            params![employee_id, hour.timestamp()],
            summary_from_row,
        )?;
        Ok(row)
    }

    pub fn mark_summary_synced(&self, summary_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE hourly_summaries SET synced = 1 WHERE id = ?1",
            params![summary_id],
        )?;
        Ok(())
    }

    /// Unsynced summaries joined with their owners, newest hour first --
    /// the retry order.
    pub fn list_unsynced_summaries(&self) -> Result<Vec<(HourlySummary, Employee)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.employee_id, s.hour, s.first_seen, s.last_seen,
                    s.minutes_online, s.synced,
                    e.id, e.employee_name, e.fake_name, e.display_order
             FROM hourly_summaries s
             JOIN employees e ON e.id = s.employee_id
             WHERE s.synced = 0
             ORDER BY s.hour DESC, e.display_order ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let summary = summary_from_row(row)?;
            let employee = Employee {
                id: row.get(7)?,
                employee_name: row.get(8)?,
                fake_name: row.get(9)?,
                display_order: row.get(10)?,
            };
            Ok((summary, employee))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ── Agent downtimes ─────────────────────────────────────────────────

    pub fn append_agent_downtime(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO agent_downtimes (downtime_start, downtime_end) VALUES (?1, ?2)",
            params![start.timestamp(), end.timestamp()],
        )?;
        Ok(())
    }

    pub fn list_unsynced_downtimes(&self) -> Result<Vec<AgentDowntime>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, downtime_start, downtime_end, synced
             FROM agent_downtimes WHERE synced = 0 ORDER BY downtime_start ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AgentDowntime {
                id: row.get(0)?,
                downtime_start: from_epoch(row.get(1)?),
                downtime_end: from_epoch(row.get(2)?),
                synced: row.get::<_, i64>(3)? != 0,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn mark_all_downtimes_synced(&self) -> Result<()> {
        self.conn()
            .execute("UPDATE agent_downtimes SET synced = 1 WHERE synced = 0", [])?;
        Ok(())
    }

    // ── Self-heartbeat singleton ────────────────────────────────────────

    pub fn touch_system_heartbeat(&self, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO system_status (key, updated_at) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET updated_at = excluded.updated_at",
            params![SYSTEM_KEY, now.timestamp()],
        )?;
        Ok(())
    }

    pub fn read_system_heartbeat(&self) -> Result<Option<DateTime<Utc>>> {
        let secs: Option<i64> = self
            .conn()
            .query_row(
                "SELECT updated_at FROM system_status WHERE key = ?1",
                params![SYSTEM_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(secs.map(from_epoch))
    }

    // ── Scan lock ───────────────────────────────────────────────────────

    /// Try to take the named lock: add-if-absent with a TTL, in one
    /// transaction. A crashed holder's lock simply expires.
    pub fn try_acquire_lock(&self, name: &str, ttl_secs: i64, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM locks WHERE name = ?1 AND expires_at <= ?2",
            params![name, now.timestamp()],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO locks (name, expires_at) VALUES (?1, ?2)",
            params![name, now.timestamp() + ttl_secs],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    pub fn release_lock(&self, name: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM locks WHERE name = ?1", params![name])?;
        Ok(())
    }
}

// ── Row mapping ─────────────────────────────────────────────────────────

fn from_epoch(secs: i64) -> DateTime<Utc> {
    // Epoch seconds out of chrono's range can only come from a corrupted
    // row; epoch zero is the least-surprising stand-in.
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get(0)?,
        employee_name: row.get(1)?,
        fake_name: row.get(2)?,
        display_order: row.get(3)?,
    })
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        employee_id: row.get(1)?,
        ip_address: row.get(2)?,
        mac_address: row.get(3)?,
        device_name: row.get(4)?,
    })
}

fn state_change_from_row(row: &Row<'_>) -> rusqlite::Result<StateChange> {
    Ok(StateChange {
        id: row.get(0)?,
        device_id: row.get(1)?,
        employee_id: row.get(2)?,
        timestamp: from_epoch(row.get(3)?),
        status: Status::from_i64(row.get(4)?).unwrap_or(Status::Offline),
        created_at: from_epoch(row.get(5)?),
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<HourlySummary> {
    Ok(HourlySummary {
        id: row.get(0)?,
        employee_id: row.get(1)?,
        hour: from_epoch(row.get(2)?),
        first_seen: from_epoch(row.get(3)?),
        last_seen: from_epoch(row.get(4)?),
        minutes_online: row.get(5)?,
        synced: row.get::<_, i64>(6)? != 0,
    })
}
