//! The turn execution core: per-session lease management, the entropy
//! source, the preview/commit turn protocol, ad-hoc rolls, snapshots,
//! and the live-update fan-out.
//!
//! The engine owns no I/O of its own. Everything persists through the
//! storage contract, so the whole core runs identically on either
//! backend.

pub mod bus;
pub mod entropy;
pub mod lock;
pub mod roll;
pub mod session;
pub mod snapshot;
pub mod turn;

use std::sync::Arc;

use tf_domain::Config;
use tf_storage::Storage;

pub use bus::{LogDelta, RollsDelta, SessionUpdate, UpdateBus};
pub use entropy::EntropySource;
pub use lock::LockManager;
pub use roll::RollOutcome;
pub use turn::{CommitOutcome, EntropyPlan, NarrateRequest, PreviewOutcome, PreviewRequest};

/// Engine knobs lifted from the service configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_template: String,
    pub default_lock_ttl_secs: u64,
    pub preview_ttl_secs: u64,
    pub preview_keep_max: usize,
    pub autosave_every_turns: u64,
    pub entropy_seed: u64,
    pub entropy_low_water: u64,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_template: config.sessions.default_template.clone(),
            default_lock_ttl_secs: config.sessions.default_lock_ttl_secs,
            preview_ttl_secs: config.sessions.preview_ttl_secs,
            preview_keep_max: config.sessions.preview_keep_max,
            autosave_every_turns: config.sessions.autosave_every_turns,
            entropy_seed: config.entropy.seed,
            entropy_low_water: config.entropy.low_water,
        }
    }
}

/// The turn execution core, shared across all HTTP handlers.
pub struct Engine {
    storage: Arc<dyn Storage>,
    locks: LockManager,
    entropy: EntropySource,
    bus: Arc<UpdateBus>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(storage: Arc<dyn Storage>, settings: EngineSettings) -> Self {
        Self {
            locks: LockManager::new(storage.clone()),
            entropy: EntropySource::new(storage.clone()),
            bus: Arc::new(UpdateBus::new()),
            storage,
            settings,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn entropy(&self) -> &EntropySource {
        &self.entropy
    }

    pub fn bus(&self) -> &Arc<UpdateBus> {
        &self.bus
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
