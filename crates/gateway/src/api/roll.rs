//! Ad-hoc roll endpoint — `POST /v1/sessions/:slug/roll`.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RollRequest {
    pub expression: String,
    /// Human label for the transcript ("Perception check").
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub lock_owner: Option<String>,
}

pub async fn roll(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<RollRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.engine.roll(
        &slug,
        &body.expression,
        body.label.as_deref(),
        body.lock_owner.as_deref(),
    )?;
    Ok(Json(outcome))
}
