use serde_json::Value;

/// Shared error type used across all turnforge crates.
///
/// Every variant carries a stable `kind` string which the HTTP layer
/// surfaces in the `{error: {kind, message, details?}}` envelope.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("session not found: {0}")]
    SessionMissing(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("lock required for session {0}")]
    LockRequired(String),

    #[error("lock held by {owner}")]
    LockHeld { owner: String },

    #[error("lock owner mismatch")]
    LockOwnerMismatch,

    #[error("preview not found: {0}")]
    PreviewMissing(String),

    #[error("preview stale: {0}")]
    PreviewStale(String),

    #[error("entropy entry {0} missing")]
    EntropyMissing(u64),

    #[error("entropy exhausted: stream ends before index {0}")]
    EntropyExhausted(u64),

    #[error("invalid roll expression: {0}")]
    ExpressionInvalid(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("config: {0}")]
    Config(String),

    #[error("database: {0}")]
    Database(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable kind string for the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionMissing(_) => "SessionMissing",
            Self::SchemaViolation(_) => "SchemaViolation",
            Self::LockRequired(_) => "LockRequired",
            Self::LockHeld { .. } => "LockHeld",
            Self::LockOwnerMismatch => "LockOwnerMismatch",
            Self::PreviewMissing(_) => "PreviewMissing",
            Self::PreviewStale(_) => "PreviewStale",
            Self::EntropyMissing(_) => "EntropyMissing",
            Self::EntropyExhausted(_) => "EntropyExhausted",
            Self::ExpressionInvalid(_) => "ExpressionInvalid",
            Self::Conflict(_) => "Conflict",
            Self::Unavailable(_) => "Unavailable",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Config(_) => "Config",
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => "Internal",
        }
    }

    /// Extra structured context for the envelope, where a variant has any.
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::LockHeld { owner } => Some(serde_json::json!({ "owner": owner })),
            Self::EntropyMissing(index) | Self::EntropyExhausted(index) => {
                Some(serde_json::json!({ "index": index }))
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
