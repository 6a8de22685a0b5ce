//! Run State Store: durable, keyed storage of Run State across invocations.
//!
//! Keys are opaque caller-supplied run/thread identifiers. There is no
//! cross-key sharing and no implicit expiry; records live until `delete`.
//!
//! Exclusive access to a key is a lease held in the store itself, so
//! every process sharing a database sees the same owner.

pub mod lease;
pub mod memory;
pub mod sqlite;

pub use lease::RunLease;
pub use memory::InMemoryRunStore;
pub use sqlite::SqliteRunStore;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::pipeline::workflow::RunState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Run state serialization error: {0}")]
    Serialization(String),

    #[error("Internal lock error")]
    LockPoisoned,

    #[error("Lease on run {0} expired and was taken by another owner")]
    LeaseLost(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}

/// One row of `list()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_key: String,
    pub status: String,
    pub question: String,
    pub updated_at: String,
}

/// Keyed persistence of Run State.
pub trait RunStateStore: Send + Sync {
    /// Stored state for the key, or a new idle record (persisted) when absent.
    fn get_or_create(&self, key: &str) -> Result<RunState, StoreError>;

    /// Overwrite the stored state for the key.
    fn save(&self, key: &str, state: &RunState) -> Result<(), StoreError>;

    /// Stored state for the key without creating one.
    fn load(&self, key: &str) -> Result<Option<RunState>, StoreError>;

    /// Remove the record ("clear history"). Returns whether one existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All stored runs, most recently updated first.
    fn list(&self) -> Result<Vec<RunSummary>, StoreError>;

    /// Take the lease on `key` for `owner`, or extend it when `owner`
    /// already holds it. Returns `false` while another owner holds an
    /// unexpired lease.
    fn try_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Give the lease back. No-op when `owner` does not hold it.
    fn release_lease(&self, key: &str, owner: &str) -> Result<(), StoreError>;
}

/// Lease expiry as unix milliseconds.
fn lease_deadline(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    chrono::Utc::now().timestamp_millis().saturating_add(ttl_ms)
}
