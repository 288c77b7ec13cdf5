//! The entropy source: ordered access to the global pre-rolled stream.
//!
//! The stream is append-only and index-addressed; this layer never
//! hands out an index twice for the same session because reservations
//! start at `state.log_index + 1` and the commit protocol advances the
//! cursor monotonically. Extension is an operator action, not an
//! automatic fallback.

use std::sync::Arc;

use tf_domain::model::EntropyEntry;
use tf_domain::{Error, Result};
use tf_storage::Storage;

pub struct EntropySource {
    storage: Arc<dyn Storage>,
}

impl EntropySource {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Highest stored index.
    pub fn length(&self) -> Result<u64> {
        self.storage.entropy_len()
    }

    /// First `limit` entries, for inspection.
    pub fn peek(&self, limit: usize) -> Result<Vec<EntropyEntry>> {
        self.storage.peek_entropy(limit)
    }

    /// Entry at `index`, or `EntropyMissing` when the stream is shorter.
    pub fn load(&self, index: u64) -> Result<EntropyEntry> {
        self.storage
            .load_entropy(index)?
            .ok_or(Error::EntropyMissing(index))
    }

    /// No-op when the stream already reaches `target_index`; otherwise
    /// `EntropyExhausted`, and the caller must extend through the
    /// operator tool.
    pub fn ensure_available(&self, target_index: u64) -> Result<()> {
        let length = self.storage.entropy_len()?;
        if target_index <= length {
            Ok(())
        } else {
            Err(Error::EntropyExhausted(target_index))
        }
    }

    /// Deterministically extend the stream by `count` entries from
    /// `seed`. Existing entries are never rewritten; re-running with
    /// the same seed appends the same values at the same indices.
    pub fn extend(&self, seed: u64, count: u64) -> Result<u64> {
        let start = self.storage.entropy_len()? + 1;
        let entries = tf_dice::generate_entries(seed, start, count);
        let new_length = self.storage.append_entropy(&entries)?;
        tracing::info!(start, count, new_length, "entropy stream extended");
        Ok(new_length)
    }

    /// Seed an empty stream on first boot.
    pub fn bootstrap_if_empty(&self, seed: u64, count: u64) -> Result<()> {
        if count > 0 && self.storage.entropy_len()? == 0 {
            self.extend(seed, count)?;
        }
        Ok(())
    }
}
