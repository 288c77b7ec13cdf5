//! Auxiliary document endpoints: whole-document JSON blobs (mood,
//! discoveries, NPC memory/relations, last-discovery, auto-save meta).
//!
//! Writes validate against the per-kind schema. `?dry_run=true` returns
//! the would-be diff and warnings without persisting. When a
//! `lock_owner` is supplied the write runs under the lease check.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use tf_domain::merge::diff;
use tf_domain::model::DocKind;
use tf_domain::schema::{doc_schema, validate};
use tf_domain::Error;

use crate::api::ApiResult;
use crate::state::AppState;

fn parse_kind(raw: &str) -> Result<DocKind, Error> {
    DocKind::parse(raw)
        .ok_or_else(|| Error::SchemaViolation(format!("unknown document kind {raw:?}")))
}

pub async fn get_doc(
    State(state): State<AppState>,
    Path((slug, kind)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&kind)?;
    let doc = state.storage.load_doc(&slug, kind)?;
    Ok(Json(json!({
        "kind": kind,
        "doc": doc,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PutDocParams {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub lock_owner: Option<String>,
}

pub async fn put_doc(
    State(state): State<AppState>,
    Path((slug, kind)): Path<(String, String)>,
    Query(params): Query<PutDocParams>,
    Json(payload): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let kind = parse_kind(&kind)?;
    validate(&payload, &doc_schema(kind))?;

    if let Some(owner) = params.lock_owner.as_deref() {
        state.engine.locks().require(&slug, Some(owner))?;
    }

    let current = state
        .storage
        .load_doc(&slug, kind)?
        .unwrap_or_else(|| json!({}));
    let diffs = diff(&current, &payload);

    let mut warnings: Vec<String> = Vec::new();
    let removed = diffs.iter().filter(|d| d.changes == "removed").count();
    if removed > 0 {
        warnings.push(format!("replaces the document, dropping {removed} field(s)"));
    }

    if params.dry_run {
        return Ok(Json(json!({
            "applied": false,
            "diffs": diffs,
            "warnings": warnings,
        })));
    }

    state.storage.save_doc(&slug, kind, &payload)?;
    Ok(Json(json!({
        "applied": true,
        "diffs": diffs,
        "warnings": warnings,
    })))
}
