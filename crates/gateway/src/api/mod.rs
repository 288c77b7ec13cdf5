pub mod auth;
pub mod character;
pub mod docs;
pub mod entropy;
pub mod events;
pub mod health;
pub mod logs;
pub mod roll;
pub mod saves;
pub mod sessions;
pub mod turn;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;

use tf_domain::Error;

use crate::state::AppState;

/// Build the full API router.
///
/// Read routes are **public**; mutating routes are **protected** behind
/// the shared-key middleware (a no-op in dev mode when no key is set).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:slug/state", get(sessions::get_state))
        .route("/v1/sessions/:slug/diff", get(sessions::session_diff))
        .route("/v1/sessions/:slug/lock", get(sessions::get_lock))
        .route("/v1/sessions/:slug/transcript", get(logs::get_transcript))
        .route("/v1/sessions/:slug/changelog", get(logs::get_changelog))
        .route("/v1/sessions/:slug/turn", get(turn::get_turn_prompt))
        .route("/v1/sessions/:slug/turns", get(turn::list_turn_records))
        .route("/v1/sessions/:slug/turns/:n", get(turn::get_turn_record))
        .route("/v1/sessions/:slug/saves", get(saves::list_saves))
        .route("/v1/sessions/:slug/saves/:save_id", get(saves::get_save))
        .route("/v1/sessions/:slug/character", get(character::get_character))
        .route("/v1/sessions/:slug/docs/:kind", get(docs::get_doc))
        .route("/v1/entropy", get(entropy::peek))
        .route("/v1/events/:slug", get(events::session_events_sse));

    let protected = Router::new()
        .route("/v1/sessions", post(sessions::create_session))
        .route("/v1/sessions/:slug/lock/claim", post(sessions::claim_lock))
        .route("/v1/sessions/:slug/lock", delete(sessions::release_lock))
        .route("/v1/sessions/:slug/turn/preview", post(turn::preview))
        .route(
            "/v1/sessions/:slug/turn/preview/:id",
            delete(turn::cancel_preview),
        )
        .route("/v1/sessions/:slug/turn/commit", post(turn::commit))
        .route(
            "/v1/sessions/:slug/turn/commit-and-narrate",
            post(turn::commit_and_narrate),
        )
        .route("/v1/sessions/:slug/roll", post(roll::roll))
        .route("/v1/sessions/:slug/saves", post(saves::create_save))
        .route(
            "/v1/sessions/:slug/saves/:save_id/restore",
            post(saves::restore_save),
        )
        .route("/v1/sessions/:slug/character", put(character::put_character))
        .route("/v1/sessions/:slug/docs/:kind", put(docs::put_doc))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wrapper turning a domain error into the canonical envelope:
/// `{error: {kind, message, details?}}`.
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "SessionMissing" | "PreviewMissing" | "EntropyMissing" => StatusCode::NOT_FOUND,
            "SchemaViolation" | "ExpressionInvalid" => StatusCode::BAD_REQUEST,
            "LockRequired" | "LockHeld" => StatusCode::LOCKED,
            "LockOwnerMismatch" => StatusCode::FORBIDDEN,
            "PreviewStale" | "Conflict" | "EntropyExhausted" => StatusCode::CONFLICT,
            "Unauthorized" => StatusCode::UNAUTHORIZED,
            "Unavailable" => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Invariant breaks are logged in full but surfaced generically.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
            "internal error".to_owned()
        } else {
            self.0.to_string()
        };

        let mut error = serde_json::json!({
            "kind": kind,
            "message": message,
        });
        if let Some(details) = self.0.details() {
            error["details"] = details;
        }
        (status, Json(serde_json::json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let response = ApiError(Error::LockHeld {
            owner: "alice".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);
    }

    #[test]
    fn internal_errors_are_generic() {
        let response = ApiError(Error::Internal("secret detail".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
