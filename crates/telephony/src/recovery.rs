//! Disconnect classification and recovery
//!
//! When a call drops unexpectedly the in-flight state is snapshotted and a
//! retry may be scheduled. Retries only make sense for technical failures
//! on calls that got past the first seconds and did not already resolve.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

use switchboard_config::RetrySettings;
use switchboard_core::CallOutcome;

use crate::TelephonyError;

/// Why the call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    NormalEnd,
    WebsocketDisconnect,
    ProviderError,
    Timeout,
    NetworkError,
    Unknown,
}

impl DisconnectCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectCause::NormalEnd => "normal_end",
            DisconnectCause::WebsocketDisconnect => "websocket_disconnect",
            DisconnectCause::ProviderError => "provider_error",
            DisconnectCause::Timeout => "timeout",
            DisconnectCause::NetworkError => "network_error",
            DisconnectCause::Unknown => "unknown",
        }
    }

    /// Map a provider status-callback string to a cause. Busy, no-answer,
    /// and canceled calls ended on purpose; only `failed` is the provider's
    /// fault.
    pub fn from_provider_status(status: &str) -> Self {
        match status {
            "completed" | "busy" | "no-answer" | "canceled" => DisconnectCause::NormalEnd,
            "failed" => DisconnectCause::ProviderError,
            _ => DisconnectCause::Unknown,
        }
    }

    /// Technical causes are the only ones worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DisconnectCause::WebsocketDisconnect
                | DisconnectCause::NetworkError
                | DisconnectCause::Timeout
        )
    }
}

impl std::fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preserved state of a call, written when the connection drops.
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub call_sid: String,
    pub lead_id: Option<String>,
    pub campaign_id: Option<String>,
    pub phone_number: Option<String>,
    pub started_at: DateTime<Utc>,
    pub transcript_lines: Vec<String>,
    pub last_user_input: Option<String>,
    pub last_agent_response: Option<String>,
    pub outcome: Option<CallOutcome>,
    pub notes: Vec<String>,
    pub cause: Option<DisconnectCause>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl CallSnapshot {
    pub fn new(call_sid: impl Into<String>) -> Self {
        Self {
            call_sid: call_sid.into(),
            lead_id: None,
            campaign_id: None,
            phone_number: None,
            started_at: Utc::now(),
            transcript_lines: Vec::new(),
            last_user_input: None,
            last_agent_response: None,
            outcome: None,
            notes: Vec::new(),
            cause: None,
            disconnected_at: None,
        }
    }

    /// Seconds from start to disconnect (or now).
    pub fn duration_seconds(&self) -> i64 {
        let end = self.disconnected_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds()
    }

    pub fn transcript(&self) -> String {
        self.transcript_lines.join("\n")
    }
}

/// The retry rules from the recovery policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub min_duration_s: u64,
    pub delay_s: u64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            min_duration_s: settings.min_duration_s,
            delay_s: settings.delay_s,
            max_attempts: settings.max_attempts,
        }
    }

    /// All four conditions must hold for a retry.
    pub fn should_retry(
        &self,
        cause: DisconnectCause,
        duration_s: i64,
        attempts_so_far: u32,
        outcome: Option<CallOutcome>,
    ) -> bool {
        if !cause.is_retryable() {
            return false;
        }
        if duration_s < self.min_duration_s as i64 {
            return false;
        }
        if attempts_so_far >= self.max_attempts {
            return false;
        }
        if outcome.map_or(false, |o| o.blocks_retry()) {
            return false;
        }
        true
    }
}

/// What recovery decided for a dropped call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Next attempt scheduled at this time
    Scheduled(DateTime<Utc>),
    /// No retry
    Declined,
}

/// Persistence surface for recovery data.
#[async_trait]
pub trait RecoveryStore: Send + Sync + 'static {
    /// Persist a disconnect snapshot.
    async fn save_snapshot(&self, snapshot: &CallSnapshot) -> Result<(), TelephonyError>;

    /// Retry attempts recorded for a lead so far.
    async fn retry_count(&self, lead_id: &str) -> Result<u32, TelephonyError>;

    /// Record a scheduled retry and bump the lead's counter.
    async fn schedule_retry(
        &self,
        lead_id: &str,
        next_attempt: DateTime<Utc>,
    ) -> Result<(), TelephonyError>;

    /// Reset the lead's counter after a completed call.
    async fn clear_retries(&self, lead_id: &str) -> Result<(), TelephonyError>;
}

/// Tracks active calls and handles their disconnects.
pub struct RecoveryHandler {
    policy: RetryPolicy,
    store: Arc<dyn RecoveryStore>,
    active: DashMap<String, CallSnapshot>,
}

impl RecoveryHandler {
    pub fn new(policy: RetryPolicy, store: Arc<dyn RecoveryStore>) -> Self {
        Self {
            policy,
            store,
            active: DashMap::new(),
        }
    }

    /// Register a call when its stream starts.
    pub fn register(&self, snapshot: CallSnapshot) {
        self.active.insert(snapshot.call_sid.clone(), snapshot);
    }

    /// Append a transcript line to the live snapshot.
    pub fn record_user(&self, call_sid: &str, text: &str) {
        if let Some(mut snapshot) = self.active.get_mut(call_sid) {
            snapshot.transcript_lines.push(format!("User: {}", text));
            snapshot.last_user_input = Some(text.to_string());
        }
    }

    pub fn record_agent(&self, call_sid: &str, text: &str) {
        if let Some(mut snapshot) = self.active.get_mut(call_sid) {
            snapshot.transcript_lines.push(format!("Agent: {}", text));
            snapshot.last_agent_response = Some(text.to_string());
        }
    }

    pub fn record_outcome(&self, call_sid: &str, outcome: CallOutcome) {
        if let Some(mut snapshot) = self.active.get_mut(call_sid) {
            snapshot.outcome = Some(outcome);
        }
    }

    pub fn record_note(&self, call_sid: &str, note: &str) {
        if let Some(mut snapshot) = self.active.get_mut(call_sid) {
            snapshot.notes.push(note.to_string());
        }
    }

    /// A call that ended on purpose: clear its retry counter, no snapshot.
    pub async fn handle_normal_end(&self, call_sid: &str) {
        if let Some((_, snapshot)) = self.active.remove(call_sid) {
            if let Some(lead_id) = &snapshot.lead_id {
                if let Err(e) = self.store.clear_retries(lead_id).await {
                    tracing::warn!(error = %e, lead_id = %lead_id, "Failed to clear retry count");
                }
            }
        }
    }

    /// Classify an unexpected disconnect: snapshot, then decide on a retry.
    pub async fn handle_disconnect(
        &self,
        call_sid: &str,
        cause: DisconnectCause,
    ) -> Result<RetryDecision, TelephonyError> {
        let (_, mut snapshot) = match self.active.remove(call_sid) {
            Some(entry) => entry,
            None => {
                tracing::warn!(call_sid = %call_sid, "Disconnect for unknown call");
                return Ok(RetryDecision::Declined);
            },
        };

        snapshot.cause = Some(cause);
        snapshot.disconnected_at = Some(Utc::now());
        let duration_s = snapshot.duration_seconds();

        tracing::info!(
            call_sid = %call_sid,
            cause = %cause,
            duration_s = duration_s,
            "Call disconnected"
        );

        self.store.save_snapshot(&snapshot).await?;

        let lead_id = match &snapshot.lead_id {
            Some(id) => id.clone(),
            None => return Ok(RetryDecision::Declined),
        };

        let attempts = self.store.retry_count(&lead_id).await?;
        if !self
            .policy
            .should_retry(cause, duration_s, attempts, snapshot.outcome)
        {
            return Ok(RetryDecision::Declined);
        }

        let next_attempt = Utc::now() + ChronoDuration::seconds(self.policy.delay_s as i64);
        self.store.schedule_retry(&lead_id, next_attempt).await?;

        tracing::info!(
            lead_id = %lead_id,
            next_attempt = %next_attempt,
            attempt = attempts + 1,
            "Retry scheduled"
        );

        Ok(RetryDecision::Scheduled(next_attempt))
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            min_duration_s: 10,
            delay_s: 300,
            max_attempts: 2,
        }
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(
            DisconnectCause::from_provider_status("completed"),
            DisconnectCause::NormalEnd
        );
        assert_eq!(
            DisconnectCause::from_provider_status("busy"),
            DisconnectCause::NormalEnd
        );
        assert_eq!(
            DisconnectCause::from_provider_status("failed"),
            DisconnectCause::ProviderError
        );
        assert_eq!(
            DisconnectCause::from_provider_status("weird"),
            DisconnectCause::Unknown
        );
    }

    #[test]
    fn test_retry_rules_truth_table() {
        let p = policy();

        // All four conditions hold.
        assert!(p.should_retry(DisconnectCause::WebsocketDisconnect, 30, 0, None));
        assert!(p.should_retry(DisconnectCause::NetworkError, 10, 1, None));
        assert!(p.should_retry(DisconnectCause::Timeout, 30, 0, Some(CallOutcome::Unknown)));

        // Non-retryable causes.
        assert!(!p.should_retry(DisconnectCause::NormalEnd, 30, 0, None));
        assert!(!p.should_retry(DisconnectCause::ProviderError, 30, 0, None));
        assert!(!p.should_retry(DisconnectCause::Unknown, 30, 0, None));

        // Too short.
        assert!(!p.should_retry(DisconnectCause::WebsocketDisconnect, 9, 0, None));

        // Attempts exhausted.
        assert!(!p.should_retry(DisconnectCause::WebsocketDisconnect, 30, 2, None));

        // Resolving outcomes block the retry.
        for outcome in [
            CallOutcome::Hostile,
            CallOutcome::DoNotCall,
            CallOutcome::WrongNumber,
            CallOutcome::MeetingBooked,
        ] {
            assert!(!p.should_retry(
                DisconnectCause::WebsocketDisconnect,
                30,
                0,
                Some(outcome)
            ));
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        snapshots: Mutex<Vec<CallSnapshot>>,
        retries: Mutex<std::collections::HashMap<String, u32>>,
    }

    #[async_trait]
    impl RecoveryStore for MemoryStore {
        async fn save_snapshot(&self, snapshot: &CallSnapshot) -> Result<(), TelephonyError> {
            self.snapshots.lock().push(snapshot.clone());
            Ok(())
        }

        async fn retry_count(&self, lead_id: &str) -> Result<u32, TelephonyError> {
            Ok(*self.retries.lock().get(lead_id).unwrap_or(&0))
        }

        async fn schedule_retry(
            &self,
            lead_id: &str,
            _next_attempt: DateTime<Utc>,
        ) -> Result<(), TelephonyError> {
            *self.retries.lock().entry(lead_id.to_string()).or_insert(0) += 1;
            Ok(())
        }

        async fn clear_retries(&self, lead_id: &str) -> Result<(), TelephonyError> {
            self.retries.lock().remove(lead_id);
            Ok(())
        }
    }

    fn snapshot_started_secs_ago(call_sid: &str, lead_id: &str, secs: i64) -> CallSnapshot {
        let mut snapshot = CallSnapshot::new(call_sid);
        snapshot.lead_id = Some(lead_id.to_string());
        snapshot.started_at = Utc::now() - ChronoDuration::seconds(secs);
        snapshot
    }

    #[tokio::test]
    async fn test_disconnect_snapshots_and_schedules() {
        let store = Arc::new(MemoryStore::default());
        let handler = RecoveryHandler::new(policy(), store.clone());

        handler.register(snapshot_started_secs_ago("CA1", "lead-1", 30));
        handler.record_user("CA1", "hello");
        handler.record_agent("CA1", "hi there");

        let decision = handler
            .handle_disconnect("CA1", DisconnectCause::WebsocketDisconnect)
            .await
            .unwrap();
        assert!(matches!(decision, RetryDecision::Scheduled(_)));

        let snapshots = store.snapshots.lock();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].transcript(), "User: hello\nAgent: hi there");
        assert_eq!(snapshots[0].last_user_input.as_deref(), Some("hello"));
        assert_eq!(snapshots[0].cause, Some(DisconnectCause::WebsocketDisconnect));
        drop(snapshots);

        assert_eq!(*store.retries.lock().get("lead-1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_declines_short_call() {
        let store = Arc::new(MemoryStore::default());
        let handler = RecoveryHandler::new(policy(), store.clone());

        handler.register(snapshot_started_secs_ago("CA2", "lead-2", 3));
        let decision = handler
            .handle_disconnect("CA2", DisconnectCause::NetworkError)
            .await
            .unwrap();
        assert_eq!(decision, RetryDecision::Declined);

        // The snapshot is still written.
        assert_eq!(store.snapshots.lock().len(), 1);
        assert!(store.retries.lock().get("lead-2").is_none());
    }

    #[tokio::test]
    async fn test_retry_cap() {
        let store = Arc::new(MemoryStore::default());
        let handler = RecoveryHandler::new(policy(), store.clone());

        for attempt in 0..3 {
            handler.register(snapshot_started_secs_ago("CA3", "lead-3", 30));
            let decision = handler
                .handle_disconnect("CA3", DisconnectCause::Timeout)
                .await
                .unwrap();
            if attempt < 2 {
                assert!(matches!(decision, RetryDecision::Scheduled(_)));
            } else {
                assert_eq!(decision, RetryDecision::Declined);
            }
        }
    }

    #[tokio::test]
    async fn test_normal_end_clears_retries() {
        let store = Arc::new(MemoryStore::default());
        let handler = RecoveryHandler::new(policy(), store.clone());

        handler.register(snapshot_started_secs_ago("CA4", "lead-4", 30));
        handler
            .handle_disconnect("CA4", DisconnectCause::NetworkError)
            .await
            .unwrap();
        assert_eq!(*store.retries.lock().get("lead-4").unwrap(), 1);

        handler.register(snapshot_started_secs_ago("CA5", "lead-4", 60));
        handler.handle_normal_end("CA5").await;
        assert!(store.retries.lock().get("lead-4").is_none());
    }

    #[tokio::test]
    async fn test_blocked_outcome_declines() {
        let store = Arc::new(MemoryStore::default());
        let handler = RecoveryHandler::new(policy(), store.clone());

        handler.register(snapshot_started_secs_ago("CA6", "lead-6", 30));
        handler.record_outcome("CA6", CallOutcome::DoNotCall);

        let decision = handler
            .handle_disconnect("CA6", DisconnectCause::WebsocketDisconnect)
            .await
            .unwrap();
        assert_eq!(decision, RetryDecision::Declined);
    }
}
