//! Run leases: at most one in-flight execution per run key, across every
//! process sharing the store.
//!
//! - `acquire()` polls until the key is free
//! - `try_acquire()` returns `None` when the key is busy
//! - `renew()` extends the lease between steps
//!
//! A lease left behind by a crashed process expires after its TTL.

use std::time::Duration;

use super::{RunStateStore, StoreError};

/// Exclusive access to one run key. Dropping releases it.
pub struct RunLease<'a> {
    store: &'a dyn RunStateStore,
    key: String,
    owner: String,
    ttl: Duration,
}

impl<'a> RunLease<'a> {
    /// Take the lease for `key` only if nobody else holds it.
    pub fn try_acquire(
        store: &'a dyn RunStateStore,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<Self>, StoreError> {
        let owner = uuid::Uuid::new_v4().to_string();
        if !store.try_lease(key, &owner, ttl)? {
            return Ok(None);
        }
        tracing::debug!(run_key = key, owner = %owner, "Took run lease");
        Ok(Some(Self {
            store,
            key: key.to_string(),
            owner,
            ttl,
        }))
    }

    /// Take the lease for `key`, polling while another owner holds it.
    pub fn acquire(
        store: &'a dyn RunStateStore,
        key: &str,
        ttl: Duration,
        poll: Duration,
    ) -> Result<Self, StoreError> {
        loop {
            if let Some(lease) = Self::try_acquire(store, key, ttl)? {
                return Ok(lease);
            }
            tracing::debug!(run_key = key, "Run key leased elsewhere, waiting");
            std::thread::sleep(poll);
        }
    }

    /// Extend the lease. Fails with `LeaseLost` when it expired and
    /// another owner took the key.
    pub fn renew(&self) -> Result<(), StoreError> {
        if self.store.try_lease(&self.key, &self.owner, self.ttl)? {
            Ok(())
        } else {
            Err(StoreError::LeaseLost(self.key.clone()))
        }
    }
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lease(&self.key, &self.owner) {
            tracing::warn!(run_key = %self.key, error = %e, "Failed to release run lease");
        }
    }
}
