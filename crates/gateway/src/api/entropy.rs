//! Entropy stream inspection — `GET /v1/entropy?limit=N`.
//!
//! Read-only: the stream is extended through the operator CLI, never
//! over HTTP.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PeekQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn peek(
    State(state): State<AppState>,
    Query(query): Query<PeekQuery>,
) -> ApiResult<impl IntoResponse> {
    let entries = state.engine.entropy().peek(query.limit.min(100))?;
    let length = state.engine.entropy().length()?;
    Ok(Json(serde_json::json!({
        "entries": entries,
        "length": length,
    })))
}
