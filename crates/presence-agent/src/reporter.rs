/// Cloud delivery.
///
/// Two paths with different guarantees. Heartbeats are fire-and-forget:
/// a lost beat is superseded by the next one. Summaries are at-least-once:
/// a failed POST leaves the row `synced = false` for the retry loop, and
/// the cloud deduplicates on (employee, hour). Unsynced agent downtimes
/// ride along with summary POSTs and are only marked synced once a POST
/// that carried them succeeded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use presence_core::model::{Employee, HourlySummary};
use presence_core::payloads::{
    DowntimeRecord, EmployeePresence, HeartbeatPayload, PresencePayload, PresenceRecord,
};
use presence_core::CLOUD_HTTP_TIMEOUT_SECONDS;

use crate::scheduler::TaskPulse;
use crate::store::Store;
use crate::AgentConfig;

pub struct Reporter {
    http: reqwest::Client,
    base_url: String,
    site_id: String,
    auth_token: String,
}

impl Reporter {
    pub fn new(config: &AgentConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLOUD_HTTP_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.cloud_api_url.trim_end_matches('/').to_string(),
            site_id: config.site_id.clone(),
            auth_token: config.agent_auth_token.clone(),
        }
    }

    /// POST the whole roster's current status -- every employee, not just
    /// whoever is online. Failure is logged and dropped; the next beat is
    /// authoritative.
    pub async fn send_heartbeat(&self, store: &Store) -> bool {
        let roster = match store.list_employees_with_devices_and_latest_state() {
            Ok(roster) => roster,
            Err(e) => {
                warn!(error = %e, "Failed to load roster for heartbeat");
                return false;
            }
        };

        let entries: Vec<EmployeePresence> = roster
            .iter()
            .map(|entry| {
                EmployeePresence::new(&entry.employee, entry.current_status(), entry.last_seen())
            })
            .collect();
        let online = entries.iter().filter(|e| e.is_present).count();
        let total = entries.len();
        let payload = HeartbeatPayload::new(&self.site_id, Utc::now(), entries);

        match self.post("/api/heartbeat", &payload).await {
            Ok(()) => {
                info!(online, total, "Heartbeat sent");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to send heartbeat");
                false
            }
        }
    }

    /// POST one summary; downtimes ride along when supplied.
    pub async fn send_summary(
        &self,
        record: PresenceRecord,
        downtimes: Option<&[presence_core::model::AgentDowntime]>,
    ) -> bool {
        let attachments =
            downtimes.map(|ds| ds.iter().map(DowntimeRecord::from).collect::<Vec<_>>());
        let payload = PresencePayload::new(&self.site_id, Utc::now(), record, attachments);

        match self.post("/api/presence", &payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to send presence summary");
                false
            }
        }
    }

    /// Deliver a freshly summarised batch. The unsynced downtimes keep
    /// riding along until the first POST that carries them succeeds; after
    /// that the remaining POSTs of the batch carry none.
    pub async fn deliver_summaries(&self, store: &Store, batch: &[(HourlySummary, Employee)]) {
        if batch.is_empty() {
            return;
        }

        let mut downtimes = match store.list_unsynced_downtimes() {
            Ok(ds) if !ds.is_empty() => Some(ds),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load unsynced downtimes");
                None
            }
        };

        let mut delivered = 0;
        for (summary, employee) in batch {
            let record = PresenceRecord::new(employee, summary);
            if self.send_summary(record, downtimes.as_deref()).await {
                if let Err(e) = store.mark_summary_synced(summary.id) {
                    warn!(error = %e, "Failed to flag summary as synced");
                }
                if downtimes.take().is_some() {
                    if let Err(e) = store.mark_all_downtimes_synced() {
                        warn!(error = %e, "Failed to flag downtimes as synced");
                    }
                }
                delivered += 1;
            }
        }
        info!(delivered, total = batch.len(), "Summary batch delivered");
    }

    /// Periodic full-roster heartbeat, independent of scan transitions.
    pub async fn run_heartbeat_loop(self: Arc<Self>, store: Arc<Store>, interval_secs: u64, pulse: TaskPulse) {
        info!(interval_secs, "Heartbeat loop started");
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            pulse.tick();
            self.send_heartbeat(&store).await;
        }
    }

    /// Periodic retry of unsynced summaries, newest hour first.
    pub async fn run_retry_loop(self: Arc<Self>, store: Arc<Store>, interval_secs: u64, pulse: TaskPulse) {
        info!(interval_secs, "Summary retry loop started");
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            pulse.tick();
            self.retry_unsynced(&store).await;
        }
    }

    async fn retry_unsynced(&self, store: &Store) {
        let unsynced = match store.list_unsynced_summaries() {
            Ok(unsynced) => unsynced,
            Err(e) => {
                warn!(error = %e, "Failed to list unsynced summaries");
                return;
            }
        };
        if unsynced.is_empty() {
            debug!("No unsynced summaries to retry");
            return;
        }

        info!(count = unsynced.len(), "Retrying unsynced summaries");
        for (summary, employee) in &unsynced {
            let record = PresenceRecord::new(employee, summary);
            if self.send_summary(record, None).await {
                if let Err(e) = store.mark_summary_synced(summary.id) {
                    warn!(error = %e, "Failed to flag summary as synced");
                }
                info!(employee = %employee.fake_name, hour = %summary.hour, "Summary synced");
            }
        }
    }

    async fn post<T: serde::Serialize>(&self, path: &str, payload: &T) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.auth_token)
            .json(payload)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }
}
