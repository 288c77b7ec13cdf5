//! Shared-key authentication for write routes.
//!
//! The env var named by `config.server.api_token_env` is read **once at
//! startup** and its SHA-256 digest cached in `AppState`. When set,
//! every protected request must carry `Authorization: Bearer <key>`.
//! When unset, the server logs a warning once and runs open (dev mode).
//! Read routes never pass through this middleware.
//!
//! Failures surface through the same `{error: {kind, ...}}` envelope
//! as every other route, with kind `Unauthorized`.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use tf_domain::Error;

use crate::api::ApiError;
use crate::state::AppState;

/// Axum middleware enforcing the shared write key on protected routes.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match check_write_key(&state, req.headers()) {
        Ok(()) => next.run(req).await,
        Err(rejection) => rejection.into_response(),
    }
}

/// Accept when no key is configured (dev mode) or the presented bearer
/// key digests to the startup-cached hash. The digests are compared in
/// constant time so neither the key nor its length leaks through
/// timing.
fn check_write_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_token_hash else {
        return Ok(());
    };

    let presented = bearer_key(headers).unwrap_or_default();
    let digest = Sha256::digest(presented.as_bytes());
    if bool::from(digest.ct_eq(expected.as_slice())) {
        Ok(())
    } else {
        Err(ApiError(Error::Unauthorized(
            "invalid or missing API key".into(),
        )))
    }
}

fn bearer_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Read the configured env var and hash it, once, at startup.
pub fn token_hash_from_env(var_name: &str) -> Option<Vec<u8>> {
    match std::env::var(var_name) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!(
                var = var_name,
                "no API key configured; write routes are open (dev mode)"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_key_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_key(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_key(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer hush"));
        assert_eq!(bearer_key(&headers), Some("hush"));
    }
}
