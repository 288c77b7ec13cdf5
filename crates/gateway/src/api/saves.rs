//! Snapshot endpoints.
//!
//! - `GET  /v1/sessions/:slug/saves`                  — list
//! - `POST /v1/sessions/:slug/saves`                  — create (under lock)
//! - `GET  /v1/sessions/:slug/saves/:save_id`         — full snapshot
//! - `POST /v1/sessions/:slug/saves/:save_id/restore` — restore (under lock)

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use tf_domain::model::SaveType;
use tf_domain::Error;

use crate::api::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn list_saves(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let saves = state.engine.list_snapshots(&slug, query.limit)?;
    Ok(Json(serde_json::json!({
        "saves": saves,
        "count": saves.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateSaveRequest {
    #[serde(default)]
    pub lock_owner: Option<String>,
}

pub async fn create_save(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<CreateSaveRequest>,
) -> ApiResult<impl IntoResponse> {
    let snapshot =
        state
            .engine
            .create_snapshot(&slug, SaveType::Manual, body.lock_owner.as_deref())?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "save_id": snapshot.save_id,
            "created_at": snapshot.created_at,
            "turn": snapshot.state.turn,
        })),
    ))
}

pub async fn get_save(
    State(state): State<AppState>,
    Path((slug, save_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .engine
        .load_snapshot(&slug, &save_id)?
        .ok_or_else(|| Error::SessionMissing(format!("{slug} has no save {save_id}")))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    #[serde(default)]
    pub lock_owner: Option<String>,
}

pub async fn restore_save(
    State(state): State<AppState>,
    Path((slug, save_id)): Path<(String, String)>,
    Json(body): Json<RestoreRequest>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .engine
        .restore_snapshot(&slug, &save_id, body.lock_owner.as_deref())?;
    Ok(Json(serde_json::json!({
        "restored": true,
        "save_id": save_id,
        "state": snapshot.state,
    })))
}
