//! The preview/commit turn protocol.
//!
//! A turn is split across the narration producer's latency: `preview`
//! reserves entropy and witnesses the state (base turn + stable hash)
//! without side effects; `commit` re-validates the witness and applies
//! the whole write set atomically. Any drift between the two (another
//! commit, an out-of-band roll) fails the commit with `PreviewStale`
//! and the caller previews again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use tf_domain::hash::stable_hash;
use tf_domain::merge::{diff, merge_patch, protected_violations};
use tf_domain::model::{DiffEntry, DmTurn, Preview, RollResult, SessionState, TurnRecord};
use tf_domain::schema::{state_schema, validate};
use tf_domain::{Error, Result};
use tf_storage::{CommitReceipt, CommitWrite};

use crate::bus::{LogDelta, RollsDelta, SessionUpdate};
use crate::Engine;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / outcome shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewRequest {
    /// Narration text; doubles as the transcript entry when none is given.
    pub response: String,
    #[serde(default)]
    pub state_patch: Value,
    #[serde(default)]
    pub transcript_entry: Option<String>,
    #[serde(default)]
    pub changelog_entry: Option<Value>,
    #[serde(default)]
    pub dice_expressions: Vec<String>,
    #[serde(default)]
    pub lock_owner: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewOutcome {
    pub id: String,
    pub diffs: Vec<DiffEntry>,
    pub entropy_plan: EntropyPlan,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntropyPlan {
    pub indices: Vec<u64>,
    pub usage: String,
}

/// Narration payload for `commit-and-narrate`.
#[derive(Debug, Clone, Deserialize)]
pub struct NarrateRequest {
    pub player_intent: String,
    #[serde(default)]
    pub consequence_echo: String,
    pub dm: DmTurn,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub state: SessionState,
    pub log_indices: CommitReceipt,
    pub rolls: Vec<RollResult>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preview
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Engine {
    /// Phase one: validate the proposal, reserve entropy, persist the
    /// witness. Touches no state, logs, or cursor.
    pub fn preview(&self, slug: &str, request: PreviewRequest) -> Result<PreviewOutcome> {
        let lock = self.locks.require(slug, request.lock_owner.as_deref())?;

        let state = self.storage.load_state(slug)?;
        let base_hash = stable_hash(&state)?;

        // Expressions must parse before anything is reserved.
        for expression in &request.dice_expressions {
            tf_dice::RollExpression::parse(expression)?;
        }

        let touched = protected_violations(&request.state_patch);
        if !touched.is_empty() {
            return Err(Error::SchemaViolation(format!(
                "state_patch may not set {}",
                touched.join(", ")
            )));
        }

        let state_value = serde_json::to_value(&state)?;
        let merged = merge_patch(&state_value, &request.state_patch);
        validate(&merged, &state_schema())?;

        let count = request.dice_expressions.len() as u64;
        let reserved_indices: Vec<u64> =
            (state.log_index + 1..=state.log_index + count).collect();
        self.entropy.ensure_available(state.log_index + count)?;
        self.warn_if_low(state.log_index + count);

        let diffs = diff(&state_value, &merged);

        self.gc_previews(slug);

        let transcript_entry = request
            .transcript_entry
            .unwrap_or_else(|| request.response.clone());
        let preview = Preview {
            id: uuid::Uuid::new_v4().simple().to_string(),
            base_turn: state.turn,
            base_hash,
            response: request.response,
            state_patch: request.state_patch,
            transcript_entry,
            changelog_entry: request.changelog_entry,
            dice_expressions: request.dice_expressions,
            reserved_indices: reserved_indices.clone(),
            created_at: Utc::now(),
            lock_owner: Some(lock.owner),
        };
        self.storage.save_preview(slug, &preview)?;

        tracing::debug!(
            slug,
            preview = %preview.id,
            base_turn = preview.base_turn,
            reserved = count,
            "preview created"
        );

        Ok(PreviewOutcome {
            id: preview.id,
            diffs,
            entropy_plan: EntropyPlan {
                indices: reserved_indices,
                usage: format!("{count} rolls"),
            },
        })
    }

    /// Phase two without a turn record: apply the previewed proposal.
    pub fn commit(
        &self,
        slug: &str,
        preview_id: &str,
        lock_owner: Option<&str>,
    ) -> Result<CommitOutcome> {
        self.commit_inner(slug, preview_id, lock_owner, None)
    }

    /// Phase two for the narrating flow: commit plus the turn record
    /// and any conditional discovery writes.
    pub fn commit_and_narrate(
        &self,
        slug: &str,
        preview_id: &str,
        lock_owner: Option<&str>,
        narrate: NarrateRequest,
    ) -> Result<CommitOutcome> {
        self.commit_inner(slug, preview_id, lock_owner, Some(narrate))
    }

    /// Cancel a parked preview. Idempotent.
    pub fn cancel_preview(&self, slug: &str, preview_id: &str) -> Result<()> {
        self.storage.delete_preview(slug, preview_id)
    }

    fn commit_inner(
        &self,
        slug: &str,
        preview_id: &str,
        lock_owner: Option<&str>,
        narrate: Option<NarrateRequest>,
    ) -> Result<CommitOutcome> {
        self.locks.require(slug, lock_owner)?;

        let preview = self
            .storage
            .load_preview(slug, preview_id)?
            .ok_or_else(|| Error::PreviewMissing(preview_id.to_owned()))?;

        // Re-validate the witness: any turn advance or out-of-band
        // state change since preview time invalidates the proposal.
        let state = self.storage.load_state(slug)?;
        let current_hash = stable_hash(&state)?;
        if state.turn != preview.base_turn || current_hash != preview.base_hash {
            self.storage.delete_preview(slug, preview_id)?;
            let reason = if state.turn != preview.base_turn {
                format!("base turn {} is now {}", preview.base_turn, state.turn)
            } else {
                "state changed since preview".to_owned()
            };
            tracing::info!(slug, preview = preview_id, %reason, "stale preview rejected");
            return Err(Error::PreviewStale(reason));
        }

        // Entropy re-verification, then resolution.
        let mut rolls = Vec::with_capacity(preview.dice_expressions.len());
        for (expression, &index) in preview.dice_expressions.iter().zip(&preview.reserved_indices)
        {
            let entry = self.entropy.load(index)?;
            rolls.push(tf_dice::evaluate(expression, &entry)?);
        }

        // Build the successor state.
        let state_value = serde_json::to_value(&state)?;
        let merged = merge_patch(&state_value, &preview.state_patch);
        let mut new_state: SessionState = serde_json::from_value(merged.clone())?;
        new_state.turn = state.turn + 1;
        new_state.log_index = preview
            .reserved_indices
            .last()
            .copied()
            .map_or(state.log_index, |highest| state.log_index.max(highest));
        validate(&serde_json::to_value(&new_state)?, &state_schema())?;

        let mut transcript_lines = vec![preview.transcript_entry.clone()];
        transcript_lines.extend(rolls.iter().map(|r| r.breakdown.clone()));
        let changelog_lines = vec![changelog_line(
            new_state.turn,
            preview.changelog_entry.clone(),
            &preview.reserved_indices,
        )?];

        let turn_record = narrate.as_ref().map(|n| TurnRecord {
            turn: new_state.turn,
            player_intent: n.player_intent.clone(),
            diff: diff(&state_value, &merged),
            consequence_echo: n.consequence_echo.clone(),
            dm: n.dm.clone(),
            created_at: Utc::now(),
            rolls: rolls.clone(),
        });

        let receipt = self.storage.commit_turn(
            slug,
            &CommitWrite {
                state: new_state.clone(),
                transcript_lines: transcript_lines.clone(),
                changelog_lines: changelog_lines.clone(),
                turn_record,
                delete_preview_id: Some(preview.id.clone()),
            },
        )?;

        if let Some(narrate) = &narrate {
            if let Some(discovery) = &narrate.dm.discovery_added {
                self.record_discovery(slug, new_state.turn, discovery);
            }
        }

        self.maybe_autosave(slug, new_state.turn);

        self.bus.publish(
            slug,
            SessionUpdate {
                turn: Some(new_state.turn),
                transcript: Some(LogDelta {
                    lines: transcript_lines,
                    cursor: receipt.transcript_len,
                }),
                changelog: Some(LogDelta {
                    lines: changelog_lines,
                    cursor: receipt.changelog_len,
                }),
                rolls: (!rolls.is_empty()).then(|| RollsDelta {
                    turn: new_state.turn,
                    items: rolls.clone(),
                }),
            },
        );

        tracing::info!(
            slug,
            turn = new_state.turn,
            log_index = new_state.log_index,
            rolls = rolls.len(),
            "turn committed"
        );

        Ok(CommitOutcome {
            state: new_state,
            log_indices: receipt,
            rolls,
        })
    }

    /// Persist a discovery surfaced by the narration: append to the
    /// discovery log and replace the last-discovery marker.
    fn record_discovery(&self, slug: &str, turn: u64, discovery: &Value) {
        let result = (|| -> Result<()> {
            let mut doc = self
                .storage
                .load_doc(slug, tf_domain::model::DocKind::Discoveries)?
                .unwrap_or_else(|| json!({ "items": [] }));
            if let Some(items) = doc.get_mut("items").and_then(Value::as_array_mut) {
                items.push(json!({ "turn": turn, "discovery": discovery }));
            }
            self.storage
                .save_doc(slug, tf_domain::model::DocKind::Discoveries, &doc)?;
            self.storage.save_doc(
                slug,
                tf_domain::model::DocKind::LastDiscovery,
                &json!({ "turn": turn, "discovery": discovery }),
            )
        })();
        if let Err(e) = result {
            tracing::warn!(slug, turn, error = %e, "discovery write failed");
        }
    }

    /// Drop previews past their TTL, then cap the survivors at the
    /// configured count (oldest first). Best effort.
    fn gc_previews(&self, slug: &str) {
        let result = (|| -> Result<usize> {
            let now = Utc::now();
            let ttl = chrono::Duration::seconds(self.settings.preview_ttl_secs as i64);
            let previews = self.storage.list_previews(slug)?;

            let mut deleted = 0;
            let mut live = Vec::new();
            for preview in previews {
                if preview.created_at + ttl < now {
                    self.storage.delete_preview(slug, &preview.id)?;
                    deleted += 1;
                } else {
                    live.push(preview);
                }
            }
            if live.len() > self.settings.preview_keep_max {
                let excess = live.len() - self.settings.preview_keep_max;
                for preview in live.iter().take(excess) {
                    self.storage.delete_preview(slug, &preview.id)?;
                    deleted += 1;
                }
            }
            Ok(deleted)
        })();
        match result {
            Ok(deleted) if deleted > 0 => {
                tracing::debug!(slug, deleted, "previews garbage-collected");
            }
            Err(e) => tracing::warn!(slug, error = %e, "preview gc failed"),
            _ => {}
        }
    }

    fn warn_if_low(&self, highest_needed: u64) {
        if self.settings.entropy_low_water == 0 {
            return;
        }
        if let Ok(length) = self.entropy.length() {
            let remaining = length.saturating_sub(highest_needed);
            if remaining < self.settings.entropy_low_water {
                tracing::warn!(
                    remaining,
                    length,
                    "entropy stream running low; extend it with the operator tool"
                );
            }
        }
    }
}

/// A changelog entry is one JSON object per line carrying the turn and
/// the entropy it consumed.
fn changelog_line(turn: u64, entry: Option<Value>, indices: &[u64]) -> Result<String> {
    let mut object = match entry {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("note".into(), other);
            map
        }
        None => serde_json::Map::new(),
    };
    object.insert("turn".into(), json!(turn));
    if !indices.is_empty() {
        object.insert("entropy_indices".into(), json!(indices));
    }
    Ok(Value::Object(object).to_string())
}
