//! Session lifecycle and lock endpoints.
//!
//! - `GET    /v1/sessions`                  — list summaries
//! - `POST   /v1/sessions`                  — create by cloning a template
//! - `GET    /v1/sessions/:slug/state`      — full session state
//! - `GET    /v1/sessions/:slug/lock`       — current lease, if any
//! - `POST   /v1/sessions/:slug/lock/claim` — claim/refresh the lease
//! - `DELETE /v1/sessions/:slug/lock`       — release (owner-checked)

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;

use tf_domain::Error;

use crate::api::ApiResult;
use crate::state::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let sessions = state.engine.list_sessions()?;
    Ok(Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub slug: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub world: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = state.engine.create_session(
        &body.slug,
        body.template.as_deref(),
        body.world.as_deref(),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "slug": body.slug,
            "state": created,
        })),
    ))
}

pub async fn get_state(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.storage.load_state(&slug)?))
}

pub async fn get_lock(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let lock = state.engine.locks().get(&slug)?;
    let held = lock
        .as_ref()
        .is_some_and(|l| !l.is_expired(Utc::now()));
    Ok(Json(serde_json::json!({
        "lock": lock,
        "held": held,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub owner: String,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

pub async fn claim_lock(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<ClaimRequest>,
) -> ApiResult<impl IntoResponse> {
    let ttl = body
        .ttl_secs
        .unwrap_or(state.config.sessions.default_lock_ttl_secs);
    let lease = state.engine.locks().claim(&slug, &body.owner, ttl)?;
    Ok(Json(serde_json::json!({ "lock": lease })))
}

/// Placeholder: the response will be `{files: [{path, changes}]}` once
/// per-artifact diffing lands.
pub async fn session_diff(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // 404 for unknown sessions, 501 otherwise.
    state.storage.load_state(&slug)?;
    Err::<Json<serde_json::Value>, _>(
        Error::Unavailable("session diff is not implemented".into()).into(),
    )
}

#[derive(Debug, Deserialize)]
pub struct ReleaseParams {
    #[serde(default)]
    pub owner: Option<String>,
}

pub async fn release_lock(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<ReleaseParams>,
) -> ApiResult<impl IntoResponse> {
    state.engine.locks().release(&slug, params.owner.as_deref())?;
    Ok(Json(serde_json::json!({ "released": true })))
}
