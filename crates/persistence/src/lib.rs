//! ScyllaDB persistence layer
//!
//! Provides persistent storage for:
//! - Thread bindings (caller identity -> durable conversation thread)
//! - Recovery snapshots and per-lead retry counters
//!
//! Each store exists in two forms: a ScyllaDB-backed implementation for
//! production and an in-memory one for development and tests.

pub mod client;
pub mod error;
pub mod recovery;
pub mod schema;
pub mod threads;

pub use client::{ScyllaClient, ScyllaConfig};
pub use error::PersistenceError;
pub use recovery::{InMemoryRecoveryStore, ScyllaRecoveryStore};
pub use threads::{InMemoryThreadStore, NewThreadMapping, ScyllaThreadStore, ThreadMapping, ThreadStore};

/// Initialize the persistence layer against ScyllaDB.
pub async fn init(config: ScyllaConfig) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(PersistenceLayer {
        threads: ScyllaThreadStore::new(client.clone()),
        recovery: ScyllaRecoveryStore::new(client),
    })
}

/// Combined persistence layer with all stores
pub struct PersistenceLayer {
    pub threads: ScyllaThreadStore,
    pub recovery: ScyllaRecoveryStore,
}
