use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub entropy: EntropyConfig,
    #[serde(default)]
    pub narrator: NarratorConfig,
}

impl Config {
    /// Apply environment overrides on top of the file-loaded config.
    ///
    /// Recognized variables: `TF_STORAGE_BACKEND`, `TF_DATA_ROOT`,
    /// `TF_DATABASE_PATH`, `TF_NARRATOR_URL`, `TF_NARRATOR_MODEL`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(backend) = std::env::var("TF_STORAGE_BACKEND") {
            match backend.as_str() {
                "file" => self.storage.backend = StorageBackend::File,
                "sqlite" => self.storage.backend = StorageBackend::Sqlite,
                other => {
                    tracing::warn!(value = other, "ignoring unknown TF_STORAGE_BACKEND");
                }
            }
        }
        if let Ok(root) = std::env::var("TF_DATA_ROOT") {
            self.storage.data_root = PathBuf::from(root);
        }
        if let Ok(db) = std::env::var("TF_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(db);
        }
        if let Ok(url) = std::env::var("TF_NARRATOR_URL") {
            self.narrator.base_url = url;
        }
        if let Ok(model) = std::env::var("TF_NARRATOR_MODEL") {
            self.narrator.model = model;
        }
    }

    /// Validate the configuration, returning every issue found.
    /// Startup refuses to proceed on any `Error`-severity issue.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port must be non-zero"));
        }
        if self.storage.data_root.as_os_str().is_empty() {
            issues.push(ConfigIssue::error("storage.data_root must be set"));
        }
        if self.storage.backend == StorageBackend::Sqlite
            && self.storage.database_path.as_os_str().is_empty()
        {
            issues.push(ConfigIssue::error(
                "storage.database_path must be set for the sqlite backend",
            ));
        }
        if self.sessions.default_lock_ttl_secs == 0 {
            issues.push(ConfigIssue::error(
                "sessions.default_lock_ttl_secs must be non-zero",
            ));
        }
        if self.sessions.preview_ttl_secs < 60 {
            issues.push(ConfigIssue::warning(
                "sessions.preview_ttl_secs under a minute will expire previews \
                 faster than a narration round-trip",
            ));
        }
        if self.entropy.low_water > 0 && self.entropy.low_water < 16 {
            issues.push(ConfigIssue::warning(
                "entropy.low_water under 16 gives little headroom before \
                 the stream needs extending",
            ));
        }

        issues
    }
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8750")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Name of the env var holding the shared write key.
    /// Unset/empty env var = dev mode (writes open, logged once).
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    /// Origins allowed for CORS. Defaults to localhost-only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8750,
            host: "127.0.0.1".into(),
            api_token_env: d_token_env(),
            allowed_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root directory for the file backend (`sessions/`, `entropy/`, ...).
    #[serde(default = "d_data_root")]
    pub data_root: PathBuf,
    /// Database file for the sqlite backend.
    #[serde(default = "d_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_root: d_data_root(),
            database_path: d_database_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & turn protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Template session cloned by `POST /v1/sessions` when the request
    /// does not name one.
    #[serde(default = "d_template")]
    pub default_template: String,

    /// Lock lease length when the claimant does not pass a TTL.
    #[serde(default = "d_120")]
    pub default_lock_ttl_secs: u64,

    /// Previews older than this are garbage-collected.
    #[serde(default = "d_3600")]
    pub preview_ttl_secs: u64,

    /// Newest previews kept per session; older ones beyond this count
    /// are garbage-collected even before their TTL.
    #[serde(default = "d_32")]
    pub preview_keep_max: usize,

    /// Auto-snapshot cadence in committed turns. 0 disables auto-saves.
    #[serde(default = "d_10")]
    pub autosave_every_turns: u64,

    /// Transcript lines folded into the DM prompt.
    #[serde(default = "d_12")]
    pub prompt_transcript_tail: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            default_template: d_template(),
            default_lock_ttl_secs: 120,
            preview_ttl_secs: 3600,
            preview_keep_max: 32,
            autosave_every_turns: 10,
            prompt_transcript_tail: 12,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entropy stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntropyConfig {
    /// Seed for deterministic stream extension via the operator CLI.
    #[serde(default = "d_seed")]
    pub seed: u64,

    /// Entries generated when a fresh deployment seeds an empty stream.
    #[serde(default = "d_256")]
    pub bootstrap_entries: u64,

    /// Remaining-entry threshold below which the service logs a warning
    /// after each reservation. 0 disables the check.
    #[serde(default = "d_64")]
    pub low_water: u64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            seed: d_seed(),
            bootstrap_entries: 256,
            low_water: 64,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Narration producer (external collaborator, passthrough only)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Defaults surfaced to clients in `GET /v1/sessions/:slug/turn` so the
/// narration producer knows where to send the assembled prompt. The
/// service itself never calls this endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarratorConfig {
    #[serde(default = "d_narrator_url")]
    pub base_url: String,
    #[serde(default = "d_narrator_model")]
    pub model: String,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            base_url: d_narrator_url(),
            model: d_narrator_model(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8750() -> u16 {
    8750
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_token_env() -> String {
    "TF_API_TOKEN".into()
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".into(),
        "http://127.0.0.1:5173".into(),
    ]
}
fn d_data_root() -> PathBuf {
    PathBuf::from("./data")
}
fn d_database_path() -> PathBuf {
    PathBuf::from("./data/turnforge.db")
}
fn d_template() -> String {
    "template-classic".into()
}
fn d_120() -> u64 {
    120
}
fn d_3600() -> u64 {
    3600
}
fn d_32() -> usize {
    32
}
fn d_10() -> u64 {
    10
}
fn d_12() -> usize {
    12
}
fn d_seed() -> u64 {
    0x5eed_d1ce_2026
}
fn d_256() -> u64 {
    256
}
fn d_64() -> u64 {
    64
}
fn d_narrator_url() -> String {
    "http://localhost:11434/v1".into()
}
fn d_narrator_model() -> String {
    "narrator-large".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        let errors: Vec<_> = config
            .validate()
            .into_iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "default config should validate: {errors:?}");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [storage]
            backend = "sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.sessions.preview_keep_max, 32);
    }

    #[test]
    fn zero_lock_ttl_rejected() {
        let mut config = Config::default();
        config.sessions.default_lock_ttl_secs = 0;
        assert!(config
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }
}
