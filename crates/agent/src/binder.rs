//! Thread binder
//!
//! Resolves a caller identity to the durable conversation thread the agent
//! runtime keys its memory by. First call from a number mints a runtime
//! thread and persists the mapping; later calls reuse it until `force_new`
//! retires it.

use std::sync::Arc;

use serde_json::Value;

use switchboard_core::AgentRuntime;
use switchboard_persistence::{NewThreadMapping, ThreadMapping, ThreadStore};

use crate::AgentError;

/// Binds (external id, type) pairs to stable runtime thread ids.
pub struct ThreadBinder {
    store: Arc<dyn ThreadStore>,
    runtime: Arc<dyn AgentRuntime>,
}

impl ThreadBinder {
    pub fn new(store: Arc<dyn ThreadStore>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self { store, runtime }
    }

    /// Stable thread id for a caller; created atomically on first contact.
    ///
    /// Without a thread the agent cannot retain context, so callers should
    /// fail the call when this errors.
    pub async fn get_or_create(
        &self,
        external_id: &str,
        external_type: &str,
        call_id: Option<&str>,
        user_name: Option<&str>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> Result<String, AgentError> {
        if let Some(existing) = self
            .store
            .active_for(external_id, external_type)
            .await
            .map_err(|e| AgentError::ThreadBinding(e.to_string()))?
        {
            self.store
                .touch(external_id, external_type, call_id, user_name)
                .await
                .map_err(|e| AgentError::ThreadBinding(e.to_string()))?;
            return Ok(existing);
        }

        self.mint_and_insert(external_id, external_type, call_id, user_name, metadata)
            .await
    }

    /// Retire the active mapping and bind a fresh thread.
    pub async fn force_new(
        &self,
        external_id: &str,
        external_type: &str,
    ) -> Result<String, AgentError> {
        self.store
            .deactivate(external_id, external_type)
            .await
            .map_err(|e| AgentError::ThreadBinding(e.to_string()))?;

        self.mint_and_insert(external_id, external_type, None, None, None)
            .await
    }

    pub async fn by_call_id(&self, call_id: &str) -> Result<Option<String>, AgentError> {
        self.store
            .by_call_id(call_id)
            .await
            .map_err(|e| AgentError::ThreadBinding(e.to_string()))
    }

    pub async fn lookup(&self, thread_id: &str) -> Result<Option<ThreadMapping>, AgentError> {
        self.store
            .lookup(thread_id)
            .await
            .map_err(|e| AgentError::ThreadBinding(e.to_string()))
    }

    pub async fn update_metadata(
        &self,
        thread_id: &str,
        delta: serde_json::Map<String, Value>,
    ) -> Result<(), AgentError> {
        self.store
            .update_metadata(thread_id, delta)
            .await
            .map_err(|e| AgentError::ThreadBinding(e.to_string()))
    }

    async fn mint_and_insert(
        &self,
        external_id: &str,
        external_type: &str,
        call_id: Option<&str>,
        user_name: Option<&str>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> Result<String, AgentError> {
        // The runtime mints the thread so its memory is keyed by an id it
        // recognizes; the store arbitrates any race on the mapping.
        let mut thread_metadata = serde_json::Map::new();
        thread_metadata.insert(
            external_type.to_string(),
            Value::String(external_id.to_string()),
        );
        let thread_id = self.runtime.create_thread(thread_metadata).await?;

        let winner = self
            .store
            .insert_active(NewThreadMapping {
                external_id: external_id.to_string(),
                external_type: external_type.to_string(),
                thread_id: thread_id.clone(),
                call_id: call_id.map(String::from),
                user_name: user_name.map(String::from),
                metadata: metadata.unwrap_or_default(),
            })
            .await
            .map_err(|e| AgentError::ThreadBinding(e.to_string()))?;

        if winner != thread_id {
            tracing::debug!(
                lost = %thread_id,
                winner = %winner,
                "Thread mapping race lost, using existing thread"
            );
        }
        Ok(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use switchboard_core::{AgentMessage, Result as CoreResult};
    use switchboard_persistence::InMemoryThreadStore;

    struct CountingRuntime {
        minted: AtomicU32,
    }

    #[async_trait]
    impl AgentRuntime for CountingRuntime {
        async fn create_thread(
            &self,
            _metadata: serde_json::Map<String, Value>,
        ) -> CoreResult<String> {
            let n = self.minted.fetch_add(1, Ordering::SeqCst);
            Ok(format!("thread-{}", n))
        }

        async fn run(
            &self,
            _thread_id: &str,
            _agent_id: &str,
            _user_text: &str,
            _configurable: serde_json::Map<String, Value>,
        ) -> CoreResult<Vec<AgentMessage>> {
            Ok(Vec::new())
        }
    }

    fn binder() -> ThreadBinder {
        ThreadBinder::new(
            Arc::new(InMemoryThreadStore::new()),
            Arc::new(CountingRuntime {
                minted: AtomicU32::new(0),
            }),
        )
    }

    #[tokio::test]
    async fn test_stable_id_until_force_new() {
        let binder = binder();

        let first = binder
            .get_or_create("+15551234567", "phone", Some("CA1"), None, None)
            .await
            .unwrap();

        // Repeated calls return the same id.
        for call in ["CA2", "CA3", "CA4"] {
            let id = binder
                .get_or_create("+15551234567", "phone", Some(call), None, None)
                .await
                .unwrap();
            assert_eq!(id, first);
        }

        // force_new returns a different id, and the new id becomes stable.
        let fresh = binder.force_new("+15551234567", "phone").await.unwrap();
        assert_ne!(fresh, first);

        let after = binder
            .get_or_create("+15551234567", "phone", None, None, None)
            .await
            .unwrap();
        assert_eq!(after, fresh);
    }

    #[tokio::test]
    async fn test_distinct_callers_get_distinct_threads() {
        let binder = binder();
        let a = binder
            .get_or_create("+15551111111", "phone", None, None, None)
            .await
            .unwrap();
        let b = binder
            .get_or_create("+15552222222", "phone", None, None, None)
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_call_id_lookup_follows_latest_call() {
        let binder = binder();
        let id = binder
            .get_or_create("+15551234567", "phone", Some("CA1"), None, None)
            .await
            .unwrap();
        binder
            .get_or_create("+15551234567", "phone", Some("CA2"), None, None)
            .await
            .unwrap();

        assert_eq!(binder.by_call_id("CA1").await.unwrap(), Some(id.clone()));
        assert_eq!(binder.by_call_id("CA2").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_metadata_merge_via_binder() {
        let binder = binder();
        let id = binder
            .get_or_create("+15551234567", "phone", None, None, None)
            .await
            .unwrap();

        let mut delta = serde_json::Map::new();
        delta.insert("last_outcome".to_string(), serde_json::json!("callback"));
        binder.update_metadata(&id, delta).await.unwrap();

        let mapping = binder.lookup(&id).await.unwrap().unwrap();
        assert_eq!(mapping.metadata["last_outcome"], "callback");
    }
}
