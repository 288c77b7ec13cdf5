//! Character sheet endpoints.
//!
//! The session-local copy is authoritative during play; setting
//! `persist_shared` mirrors the write into the shared catalog used for
//! template cloning.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use tf_domain::model::CharacterRecord;
use tf_domain::Error;

use crate::api::ApiResult;
use crate::state::AppState;

pub async fn get_character(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let character = state
        .storage
        .load_character(&slug)?
        .ok_or_else(|| Error::SessionMissing(format!("{slug} has no character")))?;
    Ok(Json(character))
}

#[derive(Debug, Deserialize)]
pub struct PutCharacterRequest {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub sheet: Value,
    #[serde(default)]
    pub persist_shared: bool,
    #[serde(default)]
    pub lock_owner: Option<String>,
}

pub async fn put_character(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(body): Json<PutCharacterRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Some(owner) = body.lock_owner.as_deref() {
        state.engine.locks().require(&slug, Some(owner))?;
    }

    let record = CharacterRecord {
        slug: body.slug,
        name: body.name,
        sheet: body.sheet,
        updated_at: Utc::now(),
    };
    state
        .storage
        .save_character(&slug, &record, body.persist_shared)?;
    Ok(Json(record))
}
