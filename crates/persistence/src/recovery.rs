//! Recovery store implementations
//!
//! Backs the telephony recovery handler: disconnect snapshots plus the
//! per-lead retry counters that cap reattempts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use switchboard_telephony::{CallSnapshot, RecoveryStore, TelephonyError};

use crate::client::ScyllaClient;

/// In-memory recovery store for development and tests.
#[derive(Default)]
pub struct InMemoryRecoveryStore {
    snapshots: RwLock<Vec<CallSnapshot>>,
    retries: RwLock<HashMap<String, u32>>,
}

impl InMemoryRecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<CallSnapshot> {
        self.snapshots.read().clone()
    }
}

#[async_trait]
impl RecoveryStore for InMemoryRecoveryStore {
    async fn save_snapshot(&self, snapshot: &CallSnapshot) -> Result<(), TelephonyError> {
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }

    async fn retry_count(&self, lead_id: &str) -> Result<u32, TelephonyError> {
        Ok(*self.retries.read().get(lead_id).unwrap_or(&0))
    }

    async fn schedule_retry(
        &self,
        lead_id: &str,
        _next_attempt: DateTime<Utc>,
    ) -> Result<(), TelephonyError> {
        *self.retries.write().entry(lead_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn clear_retries(&self, lead_id: &str) -> Result<(), TelephonyError> {
        self.retries.write().remove(lead_id);
        Ok(())
    }
}

/// ScyllaDB-backed recovery store.
#[derive(Clone)]
pub struct ScyllaRecoveryStore {
    client: ScyllaClient,
}

impl ScyllaRecoveryStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn store_err(e: impl std::fmt::Display) -> TelephonyError {
        TelephonyError::Store(e.to_string())
    }
}

#[async_trait]
impl RecoveryStore for ScyllaRecoveryStore {
    async fn save_snapshot(&self, snapshot: &CallSnapshot) -> Result<(), TelephonyError> {
        let query = format!(
            "INSERT INTO {}.call_snapshots \
             (call_id, snapshot_id, lead_id, campaign_id, phone_number, started_at, \
              disconnected_at, duration_s, cause, outcome, transcript, last_user_input, \
              last_agent_response, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &snapshot.call_sid,
                    Uuid::new_v4(),
                    snapshot.lead_id.as_deref(),
                    snapshot.campaign_id.as_deref(),
                    snapshot.phone_number.as_deref(),
                    snapshot.started_at.timestamp_millis(),
                    snapshot
                        .disconnected_at
                        .map(|t| t.timestamp_millis()),
                    snapshot.duration_seconds(),
                    snapshot.cause.map(|c| c.as_str()),
                    snapshot.outcome.map(|o| o.as_str()),
                    snapshot.transcript(),
                    snapshot.last_user_input.as_deref(),
                    snapshot.last_agent_response.as_deref(),
                    snapshot.notes.join("; "),
                ),
            )
            .await
            .map_err(Self::store_err)?;

        tracing::info!(call_sid = %snapshot.call_sid, "Recovery snapshot persisted");
        Ok(())
    }

    async fn retry_count(&self, lead_id: &str) -> Result<u32, TelephonyError> {
        let query = format!(
            "SELECT attempts FROM {}.lead_retries WHERE lead_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (lead_id,))
            .await
            .map_err(Self::store_err)?;

        if let Some(rows) = result.rows {
            for row in rows {
                let (attempts,): (i32,) = row.into_typed().map_err(Self::store_err)?;
                return Ok(attempts.max(0) as u32);
            }
        }
        Ok(0)
    }

    async fn schedule_retry(
        &self,
        lead_id: &str,
        next_attempt: DateTime<Utc>,
    ) -> Result<(), TelephonyError> {
        let attempts = self.retry_count(lead_id).await? + 1;
        let query = format!(
            "INSERT INTO {}.lead_retries (lead_id, attempts, next_attempt_at, updated_at) \
             VALUES (?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                query,
                (
                    lead_id,
                    attempts as i32,
                    next_attempt.timestamp_millis(),
                    Utc::now().timestamp_millis(),
                ),
            )
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn clear_retries(&self, lead_id: &str) -> Result<(), TelephonyError> {
        let query = format!(
            "DELETE FROM {}.lead_retries WHERE lead_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (lead_id,))
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }
}
