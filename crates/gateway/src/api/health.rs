//! Health probe — `GET /v1/health`.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::api::ApiResult;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let entropy_length = state.engine.entropy().length()?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.config.storage.backend,
        "entropy_length": entropy_length,
    })))
}
