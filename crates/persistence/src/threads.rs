//! Thread binding store
//!
//! Maps an external identifier (normally the caller's phone number) to the
//! durable conversation thread the agent runtime keys its memory by. One
//! active mapping exists per (external_id, external_type); superseded
//! mappings are soft-deactivated, never deleted.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use crate::client::ScyllaClient;
use crate::error::PersistenceError;

/// One thread mapping record
#[derive(Debug, Clone)]
pub struct ThreadMapping {
    pub external_id: String,
    pub external_type: String,
    pub thread_id: String,
    pub call_id: Option<String>,
    pub user_name: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for inserting a new mapping
#[derive(Debug, Clone)]
pub struct NewThreadMapping {
    pub external_id: String,
    pub external_type: String,
    pub thread_id: String,
    pub call_id: Option<String>,
    pub user_name: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
}

/// Storage surface for thread bindings.
///
/// `insert_active` must be atomic per key: when two sessions race, exactly
/// one thread id wins and both callers observe it.
#[async_trait]
pub trait ThreadStore: Send + Sync + 'static {
    /// Active thread id for a key, if any.
    async fn active_for(
        &self,
        external_id: &str,
        external_type: &str,
    ) -> Result<Option<String>, PersistenceError>;

    /// Insert as the active mapping unless one exists; returns the thread
    /// id that is active after the call.
    async fn insert_active(&self, mapping: NewThreadMapping) -> Result<String, PersistenceError>;

    /// Refresh call id / user name on the active mapping (repeat calls).
    async fn touch(
        &self,
        external_id: &str,
        external_type: &str,
        call_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<(), PersistenceError>;

    /// Thread id most recently associated with a provider call sid.
    async fn by_call_id(&self, call_id: &str) -> Result<Option<String>, PersistenceError>;

    /// Full mapping record for a thread id.
    async fn lookup(&self, thread_id: &str) -> Result<Option<ThreadMapping>, PersistenceError>;

    /// Merge metadata fields into a mapping.
    async fn update_metadata(
        &self,
        thread_id: &str,
        delta: serde_json::Map<String, Value>,
    ) -> Result<(), PersistenceError>;

    /// Soft-deactivate the active mapping for a key; true when one existed.
    async fn deactivate(
        &self,
        external_id: &str,
        external_type: &str,
    ) -> Result<bool, PersistenceError>;
}

/// In-memory thread store for development and tests.
#[derive(Default)]
pub struct InMemoryThreadStore {
    mappings: RwLock<Vec<ThreadMapping>>,
    by_call: RwLock<HashMap<String, String>>,
}

impl InMemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for InMemoryThreadStore {
    async fn active_for(
        &self,
        external_id: &str,
        external_type: &str,
    ) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .mappings
            .read()
            .iter()
            .find(|m| m.external_id == external_id && m.external_type == external_type && m.active)
            .map(|m| m.thread_id.clone()))
    }

    async fn insert_active(&self, new: NewThreadMapping) -> Result<String, PersistenceError> {
        let mut mappings = self.mappings.write();
        if let Some(existing) = mappings
            .iter()
            .find(|m| m.external_id == new.external_id && m.external_type == new.external_type && m.active)
        {
            return Ok(existing.thread_id.clone());
        }

        let now = Utc::now();
        if let Some(call_id) = &new.call_id {
            self.by_call
                .write()
                .insert(call_id.clone(), new.thread_id.clone());
        }
        mappings.push(ThreadMapping {
            external_id: new.external_id,
            external_type: new.external_type,
            thread_id: new.thread_id.clone(),
            call_id: new.call_id,
            user_name: new.user_name,
            metadata: new.metadata,
            active: true,
            created_at: now,
            updated_at: now,
        });
        Ok(new.thread_id)
    }

    async fn touch(
        &self,
        external_id: &str,
        external_type: &str,
        call_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let mut mappings = self.mappings.write();
        if let Some(mapping) = mappings
            .iter_mut()
            .find(|m| m.external_id == external_id && m.external_type == external_type && m.active)
        {
            if let Some(call_id) = call_id {
                mapping.call_id = Some(call_id.to_string());
                self.by_call
                    .write()
                    .insert(call_id.to_string(), mapping.thread_id.clone());
            }
            if let Some(user_name) = user_name {
                mapping.user_name = Some(user_name.to_string());
            }
            mapping.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn by_call_id(&self, call_id: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.by_call.read().get(call_id).cloned())
    }

    async fn lookup(&self, thread_id: &str) -> Result<Option<ThreadMapping>, PersistenceError> {
        Ok(self
            .mappings
            .read()
            .iter()
            .find(|m| m.thread_id == thread_id)
            .cloned())
    }

    async fn update_metadata(
        &self,
        thread_id: &str,
        delta: serde_json::Map<String, Value>,
    ) -> Result<(), PersistenceError> {
        let mut mappings = self.mappings.write();
        if let Some(mapping) = mappings.iter_mut().find(|m| m.thread_id == thread_id) {
            for (key, value) in delta {
                mapping.metadata.insert(key, value);
            }
            mapping.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn deactivate(
        &self,
        external_id: &str,
        external_type: &str,
    ) -> Result<bool, PersistenceError> {
        let mut mappings = self.mappings.write();
        let mut found = false;
        for mapping in mappings
            .iter_mut()
            .filter(|m| m.external_id == external_id && m.external_type == external_type && m.active)
        {
            mapping.active = false;
            mapping.updated_at = Utc::now();
            found = true;
        }
        Ok(found)
    }
}

/// ScyllaDB-backed thread store.
///
/// The single-row `thread_active` table carries the per-key uniqueness; an
/// `IF NOT EXISTS` insert arbitrates races, and the winner is re-read.
#[derive(Clone)]
pub struct ScyllaThreadStore {
    client: ScyllaClient,
}

impl ScyllaThreadStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ThreadStore for ScyllaThreadStore {
    async fn active_for(
        &self,
        external_id: &str,
        external_type: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let query = format!(
            "SELECT thread_id FROM {}.thread_active \
             WHERE external_id = ? AND external_type = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (external_id, external_type))
            .await?;

        if let Some(rows) = result.rows {
            for row in rows {
                let (thread_id,): (String,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(Some(thread_id));
            }
        }
        Ok(None)
    }

    async fn insert_active(&self, new: NewThreadMapping) -> Result<String, PersistenceError> {
        let now = Utc::now().timestamp_millis();
        let keyspace = self.client.keyspace();

        let insert = format!(
            "INSERT INTO {}.thread_active (external_id, external_type, thread_id, updated_at) \
             VALUES (?, ?, ?, ?) IF NOT EXISTS",
            keyspace
        );
        self.client
            .session()
            .query_unpaged(
                insert,
                (&new.external_id, &new.external_type, &new.thread_id, now),
            )
            .await?;

        // The winner (ours or a racing session's) is whatever the active
        // row now holds.
        let winner = self
            .active_for(&new.external_id, &new.external_type)
            .await?
            .unwrap_or_else(|| new.thread_id.clone());

        if winner == new.thread_id {
            let metadata_json = serde_json::to_string(&new.metadata)
                .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

            let mapping = format!(
                "INSERT INTO {}.thread_mappings \
                 (thread_id, external_id, external_type, call_id, user_name, metadata_json, \
                  active, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, true, ?, ?)",
                keyspace
            );
            self.client
                .session()
                .query_unpaged(
                    mapping,
                    (
                        &new.thread_id,
                        &new.external_id,
                        &new.external_type,
                        new.call_id.as_deref(),
                        new.user_name.as_deref(),
                        metadata_json,
                        now,
                        now,
                    ),
                )
                .await?;

            if let Some(call_id) = &new.call_id {
                let by_call = format!(
                    "INSERT INTO {}.thread_by_call (call_id, thread_id) VALUES (?, ?)",
                    keyspace
                );
                self.client
                    .session()
                    .query_unpaged(by_call, (call_id, &new.thread_id))
                    .await?;
            }

            tracing::info!(
                thread_id = %new.thread_id,
                external_id = %new.external_id,
                "Created thread mapping"
            );
        }

        Ok(winner)
    }

    async fn touch(
        &self,
        external_id: &str,
        external_type: &str,
        call_id: Option<&str>,
        user_name: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let thread_id = match self.active_for(external_id, external_type).await? {
            Some(id) => id,
            None => return Ok(()),
        };
        let keyspace = self.client.keyspace();
        let now = Utc::now().timestamp_millis();

        if let Some(call_id) = call_id {
            let update = format!(
                "UPDATE {}.thread_mappings SET call_id = ?, updated_at = ? WHERE thread_id = ?",
                keyspace
            );
            self.client
                .session()
                .query_unpaged(update, (call_id, now, &thread_id))
                .await?;

            let by_call = format!(
                "INSERT INTO {}.thread_by_call (call_id, thread_id) VALUES (?, ?)",
                keyspace
            );
            self.client
                .session()
                .query_unpaged(by_call, (call_id, &thread_id))
                .await?;
        }

        if let Some(user_name) = user_name {
            let update = format!(
                "UPDATE {}.thread_mappings SET user_name = ?, updated_at = ? WHERE thread_id = ?",
                keyspace
            );
            self.client
                .session()
                .query_unpaged(update, (user_name, now, &thread_id))
                .await?;
        }

        Ok(())
    }

    async fn by_call_id(&self, call_id: &str) -> Result<Option<String>, PersistenceError> {
        let query = format!(
            "SELECT thread_id FROM {}.thread_by_call WHERE call_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (call_id,))
            .await?;

        if let Some(rows) = result.rows {
            for row in rows {
                let (thread_id,): (String,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(Some(thread_id));
            }
        }
        Ok(None)
    }

    async fn lookup(&self, thread_id: &str) -> Result<Option<ThreadMapping>, PersistenceError> {
        let query = format!(
            "SELECT thread_id, external_id, external_type, call_id, user_name, metadata_json, \
                    active, created_at, updated_at \
             FROM {}.thread_mappings WHERE thread_id = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(query, (thread_id,))
            .await?;

        if let Some(rows) = result.rows {
            for row in rows {
                let (
                    thread_id,
                    external_id,
                    external_type,
                    call_id,
                    user_name,
                    metadata_json,
                    active,
                    created_at,
                    updated_at,
                ): (
                    String,
                    String,
                    String,
                    Option<String>,
                    Option<String>,
                    Option<String>,
                    bool,
                    i64,
                    i64,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                return Ok(Some(ThreadMapping {
                    external_id,
                    external_type,
                    thread_id,
                    call_id,
                    user_name,
                    metadata: metadata_json
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                    active,
                    created_at: DateTime::from_timestamp_millis(created_at)
                        .unwrap_or_else(Utc::now),
                    updated_at: DateTime::from_timestamp_millis(updated_at)
                        .unwrap_or_else(Utc::now),
                }));
            }
        }
        Ok(None)
    }

    async fn update_metadata(
        &self,
        thread_id: &str,
        delta: serde_json::Map<String, Value>,
    ) -> Result<(), PersistenceError> {
        let existing = match self.lookup(thread_id).await? {
            Some(mapping) => mapping,
            None => return Ok(()),
        };

        let mut metadata = existing.metadata;
        for (key, value) in delta {
            metadata.insert(key, value);
        }
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

        let update = format!(
            "UPDATE {}.thread_mappings SET metadata_json = ?, updated_at = ? WHERE thread_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                update,
                (metadata_json, Utc::now().timestamp_millis(), thread_id),
            )
            .await?;
        Ok(())
    }

    async fn deactivate(
        &self,
        external_id: &str,
        external_type: &str,
    ) -> Result<bool, PersistenceError> {
        let thread_id = match self.active_for(external_id, external_type).await? {
            Some(id) => id,
            None => return Ok(false),
        };
        let keyspace = self.client.keyspace();

        let delete = format!(
            "DELETE FROM {}.thread_active WHERE external_id = ? AND external_type = ?",
            keyspace
        );
        self.client
            .session()
            .query_unpaged(delete, (external_id, external_type))
            .await?;

        let update = format!(
            "UPDATE {}.thread_mappings SET active = false, updated_at = ? WHERE thread_id = ?",
            keyspace
        );
        self.client
            .session()
            .query_unpaged(update, (Utc::now().timestamp_millis(), &thread_id))
            .await?;

        tracing::info!(
            thread_id = %thread_id,
            external_id = %external_id,
            "Thread mapping deactivated"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_mapping(external_id: &str, thread_id: &str, call_id: Option<&str>) -> NewThreadMapping {
        NewThreadMapping {
            external_id: external_id.to_string(),
            external_type: "phone".to_string(),
            thread_id: thread_id.to_string(),
            call_id: call_id.map(String::from),
            user_name: None,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_active_returns_winner() {
        let store = InMemoryThreadStore::new();

        let first = store
            .insert_active(new_mapping("+15551234567", "thread-a", None))
            .await
            .unwrap();
        assert_eq!(first, "thread-a");

        // A second insert for the same key loses to the existing mapping.
        let second = store
            .insert_active(new_mapping("+15551234567", "thread-b", None))
            .await
            .unwrap();
        assert_eq!(second, "thread-a");

        // A different key gets its own thread.
        let other = store
            .insert_active(new_mapping("+15559876543", "thread-c", None))
            .await
            .unwrap();
        assert_eq!(other, "thread-c");
    }

    #[tokio::test]
    async fn test_deactivate_then_new_mapping() {
        let store = InMemoryThreadStore::new();
        store
            .insert_active(new_mapping("+15551234567", "thread-a", None))
            .await
            .unwrap();

        assert!(store.deactivate("+15551234567", "phone").await.unwrap());
        assert_eq!(store.active_for("+15551234567", "phone").await.unwrap(), None);

        // The old mapping survives lookup as inactive.
        let old = store.lookup("thread-a").await.unwrap().unwrap();
        assert!(!old.active);

        let fresh = store
            .insert_active(new_mapping("+15551234567", "thread-b", None))
            .await
            .unwrap();
        assert_eq!(fresh, "thread-b");
    }

    #[tokio::test]
    async fn test_call_id_lookup_and_touch() {
        let store = InMemoryThreadStore::new();
        store
            .insert_active(new_mapping("+15551234567", "thread-a", Some("CA1")))
            .await
            .unwrap();

        assert_eq!(
            store.by_call_id("CA1").await.unwrap().as_deref(),
            Some("thread-a")
        );

        // A repeat call updates the call id.
        store
            .touch("+15551234567", "phone", Some("CA2"), Some("Jordan"))
            .await
            .unwrap();
        assert_eq!(
            store.by_call_id("CA2").await.unwrap().as_deref(),
            Some("thread-a")
        );

        let mapping = store.lookup("thread-a").await.unwrap().unwrap();
        assert_eq!(mapping.call_id.as_deref(), Some("CA2"));
        assert_eq!(mapping.user_name.as_deref(), Some("Jordan"));
    }

    #[tokio::test]
    async fn test_update_metadata_merges() {
        let store = InMemoryThreadStore::new();
        let mut metadata = serde_json::Map::new();
        metadata.insert("campaign".to_string(), serde_json::json!("spring"));
        store
            .insert_active(NewThreadMapping {
                metadata,
                ..new_mapping("+15551234567", "thread-a", None)
            })
            .await
            .unwrap();

        let mut delta = serde_json::Map::new();
        delta.insert("outcome".to_string(), serde_json::json!("callback"));
        store.update_metadata("thread-a", delta).await.unwrap();

        let mapping = store.lookup("thread-a").await.unwrap().unwrap();
        assert_eq!(mapping.metadata["campaign"], "spring");
        assert_eq!(mapping.metadata["outcome"], "callback");
    }

    #[tokio::test]
    async fn test_deactivate_without_mapping() {
        let store = InMemoryThreadStore::new();
        assert!(!store.deactivate("+15550000000", "phone").await.unwrap());
    }
}
