//! ScyllaDB schema creation

use scylla::Session;

use crate::error::PersistenceError;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
         {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // Active thread binding per (external_id, external_type). One row per
    // key keeps the uniqueness invariant; history lives in thread_mappings.
    let thread_active = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.thread_active (
            external_id TEXT,
            external_type TEXT,
            thread_id TEXT,
            updated_at BIGINT,
            PRIMARY KEY ((external_id, external_type))
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(thread_active, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("Failed to create thread_active: {}", e)))?;

    // Full mapping record, looked up by thread id.
    let thread_mappings = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.thread_mappings (
            thread_id TEXT,
            external_id TEXT,
            external_type TEXT,
            call_id TEXT,
            user_name TEXT,
            metadata_json TEXT,
            active BOOLEAN,
            created_at BIGINT,
            updated_at BIGINT,
            PRIMARY KEY (thread_id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(thread_mappings, &[])
        .await
        .map_err(|e| {
            PersistenceError::Schema(format!("Failed to create thread_mappings: {}", e))
        })?;

    // Call-sid lookup.
    let thread_by_call = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.thread_by_call (
            call_id TEXT,
            thread_id TEXT,
            PRIMARY KEY (call_id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(thread_by_call, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("Failed to create thread_by_call: {}", e)))?;

    // Disconnect snapshots, newest first per call.
    let call_snapshots = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.call_snapshots (
            call_id TEXT,
            snapshot_id UUID,
            lead_id TEXT,
            campaign_id TEXT,
            phone_number TEXT,
            started_at BIGINT,
            disconnected_at BIGINT,
            duration_s BIGINT,
            cause TEXT,
            outcome TEXT,
            transcript TEXT,
            last_user_input TEXT,
            last_agent_response TEXT,
            notes TEXT,
            PRIMARY KEY ((call_id), snapshot_id)
        ) WITH CLUSTERING ORDER BY (snapshot_id DESC)
    "#,
        keyspace
    );

    session
        .query_unpaged(call_snapshots, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("Failed to create call_snapshots: {}", e)))?;

    // Per-lead retry tracking.
    let lead_retries = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.lead_retries (
            lead_id TEXT,
            attempts INT,
            next_attempt_at BIGINT,
            updated_at BIGINT,
            PRIMARY KEY (lead_id)
        )
    "#,
        keyspace
    );

    session
        .query_unpaged(lead_retries, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("Failed to create lead_retries: {}", e)))?;

    tracing::info!("All tables created successfully");
    Ok(())
}
