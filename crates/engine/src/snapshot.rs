//! Snapshots: manual saves, restore, and the auto-save cadence.

use chrono::Utc;
use serde_json::json;

use tf_domain::model::{DocKind, SaveType, Snapshot, SnapshotSummary};
use tf_domain::{Error, Result};

use crate::bus::{LogDelta, SessionUpdate};
use crate::Engine;

impl Engine {
    /// Capture the session under the held lock. `save_id`s are minted
    /// here and unique within the session.
    pub fn create_snapshot(
        &self,
        slug: &str,
        save_type: SaveType,
        lock_owner: Option<&str>,
    ) -> Result<Snapshot> {
        self.locks.require(slug, lock_owner)?;
        let snapshot = self.build_snapshot(slug, save_type)?;
        self.storage.create_snapshot(slug, &snapshot)?;
        tracing::info!(slug, save_id = %snapshot.save_id, ?save_type, "snapshot created");
        Ok(snapshot)
    }

    pub fn list_snapshots(&self, slug: &str, limit: usize) -> Result<Vec<SnapshotSummary>> {
        self.storage.list_snapshots(slug, limit)
    }

    pub fn load_snapshot(&self, slug: &str, save_id: &str) -> Result<Option<Snapshot>> {
        self.storage.load_snapshot(slug, save_id)
    }

    /// Restore the session to a saved capture. Requires the lock; the
    /// restore is recorded in the changelog.
    pub fn restore_snapshot(
        &self,
        slug: &str,
        save_id: &str,
        lock_owner: Option<&str>,
    ) -> Result<Snapshot> {
        self.locks.require(slug, lock_owner)?;

        let snapshot = self
            .storage
            .load_snapshot(slug, save_id)?
            .ok_or_else(|| Error::SessionMissing(format!("{slug} has no save {save_id}")))?;

        self.storage.save_state(slug, &snapshot.state)?;
        if let Some(character) = &snapshot.character {
            self.storage.save_character(slug, character, false)?;
        }
        let line = json!({
            "event": "restored",
            "save_id": save_id,
            "turn": snapshot.state.turn,
        })
        .to_string();
        let changelog_len = self.storage.append_changelog(slug, &[line.clone()])?;

        self.bus.publish(
            slug,
            SessionUpdate {
                turn: Some(snapshot.state.turn),
                transcript: None,
                changelog: Some(LogDelta {
                    lines: vec![line],
                    cursor: changelog_len,
                }),
                rolls: None,
            },
        );

        tracing::info!(slug, save_id, turn = snapshot.state.turn, "session restored");
        Ok(snapshot)
    }

    /// Auto-save after a commit when the cadence divides the new turn.
    /// Runs under the already-held lock; failures are logged, never
    /// surfaced, since a missed auto-save must not fail the commit.
    pub(crate) fn maybe_autosave(&self, slug: &str, turn: u64) {
        let every = self.settings.autosave_every_turns;
        if every == 0 || turn == 0 || turn % every != 0 {
            return;
        }
        let result = (|| -> Result<()> {
            let snapshot = self.build_snapshot(slug, SaveType::Auto)?;
            self.storage.create_snapshot(slug, &snapshot)?;
            self.storage.save_doc(
                slug,
                DocKind::AutosaveMeta,
                &json!({ "save_id": snapshot.save_id, "turn": turn }),
            )?;
            tracing::debug!(slug, save_id = %snapshot.save_id, turn, "auto-save written");
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!(slug, turn, error = %e, "auto-save failed");
        }
    }

    fn build_snapshot(&self, slug: &str, save_type: SaveType) -> Result<Snapshot> {
        let state = self.storage.load_state(slug)?;
        let character = self.storage.load_character(slug)?;
        let prefix = match save_type {
            SaveType::Auto => "auto",
            SaveType::Manual => "save",
        };
        let save_id = format!(
            "{prefix}-t{}-{}",
            state.turn,
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        Ok(Snapshot {
            save_id,
            save_type,
            created_at: Utc::now(),
            state,
            character,
        })
    }
}
