//! Per-session lease management.
//!
//! The storage backends provide the atomic claim primitive; this layer
//! adds the protocol: idempotent same-owner refresh, passive expiry,
//! and the `require` check every writer runs before touching a session.

use std::sync::Arc;

use chrono::Utc;

use tf_domain::model::LockState;
use tf_domain::{Error, Result};
use tf_storage::Storage;

pub struct LockManager {
    storage: Arc<dyn Storage>,
}

impl LockManager {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Claim the session lease. Succeeds when the session is unlocked,
    /// the current lease expired, or the claimant already owns it.
    pub fn claim(&self, slug: &str, owner: &str, ttl_secs: u64) -> Result<LockState> {
        let lease = self.storage.claim_lock(slug, owner, ttl_secs)?;
        tracing::debug!(slug, owner, ttl_secs, "lock claimed");
        Ok(lease)
    }

    /// Release the lease. `owner` must match when provided.
    pub fn release(&self, slug: &str, owner: Option<&str>) -> Result<()> {
        self.storage.release_lock(slug, owner)?;
        tracing::debug!(slug, owner = owner.unwrap_or("<any>"), "lock released");
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Result<Option<LockState>> {
        self.storage.get_lock(slug)
    }

    /// Require a live lease on the session: held, unexpired, and (when
    /// `owner` is provided) held by that owner. Fails with
    /// `LockRequired` otherwise.
    pub fn require(&self, slug: &str, owner: Option<&str>) -> Result<LockState> {
        let lock = self
            .storage
            .get_lock(slug)?
            .ok_or_else(|| Error::LockRequired(slug.to_owned()))?;
        if lock.is_expired(Utc::now()) {
            return Err(Error::LockRequired(slug.to_owned()));
        }
        if let Some(owner) = owner {
            if lock.owner != owner {
                return Err(Error::LockRequired(slug.to_owned()));
            }
        }
        Ok(lock)
    }
}
