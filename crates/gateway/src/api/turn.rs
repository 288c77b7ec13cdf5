//! The turn protocol endpoints.
//!
//! - `GET    /v1/sessions/:slug/turn`                    — DM prompt + lock status
//! - `POST   /v1/sessions/:slug/turn/preview`            — phase one
//! - `DELETE /v1/sessions/:slug/turn/preview/:id`        — cancel a parked preview
//! - `POST   /v1/sessions/:slug/turn/commit`             — phase two
//! - `POST   /v1/sessions/:slug/turn/commit-and-narrate` — phase two + turn record
//! - `GET    /v1/sessions/:slug/turns[/:n]`              — turn records

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;

use tf_domain::model::SessionState;
use tf_domain::Error;
use tf_engine::{NarrateRequest, PreviewRequest};

use crate::api::ApiResult;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:slug/turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_turn_prompt(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state.storage.load_state(&slug)?;
    let tail = state.config.sessions.prompt_transcript_tail;
    let transcript = state.storage.load_transcript(&slug, Some(tail), None)?;

    let lock_status = match state.engine.locks().get(&slug)? {
        Some(lock) if lock.is_expired(Utc::now()) => format!("expired ({})", lock.owner),
        Some(lock) => format!("held by {}", lock.owner),
        None => "unlocked".to_owned(),
    };

    let prompt = build_prompt(&session, &transcript.items);

    Ok(Json(serde_json::json!({
        "prompt": prompt,
        "turn_number": session.turn,
        "lock_status": lock_status,
        "narrator": {
            "base_url": state.config.narrator.base_url,
            "model": state.config.narrator.model,
        },
    })))
}

/// Assemble the prompt the narration producer works from: a state
/// summary plus the recent transcript.
fn build_prompt(session: &SessionState, recent: &[tf_domain::model::LogItem]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Turn {turn}. The party is at {location}. \
         HP {hp}/{max_hp}, AC {ac}, {gold} gold.\n",
        turn = session.turn,
        location = if session.location.is_empty() {
            "an unknown place"
        } else {
            &session.location
        },
        hp = session.hp,
        max_hp = session.max_hp,
        ac = session.ac,
        gold = session.gold,
    ));
    if !session.conditions.is_empty() {
        prompt.push_str(&format!("Conditions: {}.\n", session.conditions.join(", ")));
    }
    if !session.inventory.is_empty() {
        prompt.push_str(&format!("Carrying: {}.\n", session.inventory.join(", ")));
    }
    if !recent.is_empty() {
        prompt.push_str("\nRecently:\n");
        for item in recent {
            prompt.push_str(&format!("  {}\n", item.text));
        }
    }
    prompt.push_str("\nNarrate the next scene and propose a state patch.");
    prompt
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preview / commit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn preview(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<PreviewRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.preview(&slug, body)?))
}

pub async fn cancel_preview(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state.engine.cancel_preview(&slug, &id)?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub preview_id: String,
    #[serde(default)]
    pub lock_owner: Option<String>,
}

pub async fn commit(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<CommitRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .commit(&slug, &body.preview_id, body.lock_owner.as_deref())?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct CommitNarrateRequest {
    pub preview_id: String,
    #[serde(default)]
    pub lock_owner: Option<String>,
    #[serde(flatten)]
    pub narrate: NarrateRequest,
}

pub async fn commit_and_narrate(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<CommitNarrateRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.engine.commit_and_narrate(
        &slug,
        &body.preview_id,
        body.lock_owner.as_deref(),
        body.narrate,
    )?;
    Ok(Json(outcome))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct TurnsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn list_turn_records(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<TurnsQuery>,
) -> ApiResult<impl IntoResponse> {
    let records = state.storage.load_turn_records(&slug, query.limit)?;
    Ok(Json(serde_json::json!({
        "turns": records,
        "count": records.len(),
    })))
}

pub async fn get_turn_record(
    State(state): State<AppState>,
    Path((slug, n)): Path<(String, u64)>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .storage
        .load_turn_record(&slug, n)?
        .ok_or_else(|| Error::SessionMissing(format!("{slug} has no turn record {n}")))?;
    Ok(Json(record))
}
