//! Transcript and changelog reads.
//!
//! Both logs page the same way: `?tail=N` for the last N entries,
//! `?cursor=C` for entries after position C. The response cursor is the
//! last position in the whole log; hand it back to read only deltas,
//! which is also how SSE subscribers reconcile after a reconnect.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub tail: Option<usize>,
    #[serde(default)]
    pub cursor: Option<u64>,
}

pub async fn get_transcript(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .storage
        .load_transcript(&slug, query.tail, query.cursor)?;
    Ok(Json(page))
}

pub async fn get_changelog(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<LogQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .storage
        .load_changelog(&slug, query.tail, query.cursor)?;
    Ok(Json(page))
}
