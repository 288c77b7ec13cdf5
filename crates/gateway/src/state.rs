use std::sync::Arc;

use tf_domain::Config;
use tf_engine::Engine;
use tf_storage::Storage;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The turn execution core (locks, entropy, previews, commits).
    pub engine: Arc<Engine>,
    /// Direct storage handle for read-only routes.
    pub storage: Arc<dyn Storage>,
    /// SHA-256 hash of the shared write key (read once at startup).
    /// `None` = dev mode (write routes open).
    pub api_token_hash: Option<Vec<u8>>,
}
