//! The backend-neutral storage contract.
//!
//! Two implementations (a filesystem tree and a SQLite database)
//! expose identical externally observable semantics: entry ordering,
//! turn monotonicity, and atomicity of the multi-artifact turn commit.
//! Everything above this crate talks to `dyn Storage` and cannot tell
//! the backends apart.

pub mod fs;
pub mod sqlite;

use std::sync::Arc;

use serde_json::Value;

use tf_domain::config::{Config, StorageBackend};
use tf_domain::model::{
    CharacterRecord, DocKind, EntropyEntry, LockState, LogPage, Preview, RollResult, SessionMeta,
    SessionState, SessionSummary, Snapshot, SnapshotSummary, TurnRecord,
};
use tf_domain::Result;

pub use fs::FsStorage;
pub use sqlite::SqliteStorage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commit write set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a turn commit writes as one atomic unit.
#[derive(Debug, Clone)]
pub struct CommitWrite {
    pub state: SessionState,
    pub transcript_lines: Vec<String>,
    pub changelog_lines: Vec<String>,
    /// Present for narrated commits; keyed by `state.turn`.
    pub turn_record: Option<TurnRecord>,
    /// Preview consumed by this commit, deleted in the same unit.
    pub delete_preview_id: Option<String>,
}

/// Log positions after a successful commit (1-based last entries).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CommitReceipt {
    #[serde(rename = "transcript")]
    pub transcript_len: u64,
    #[serde(rename = "changelog")]
    pub changelog_len: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait Storage: Send + Sync {
    // ── Session lifecycle ─────────────────────────────────────────
    fn list_sessions(&self) -> Result<Vec<SessionSummary>>;
    fn session_exists(&self, slug: &str) -> Result<bool>;
    /// Create a session with its initial artifacts. Fails with
    /// `Conflict` if the slug exists.
    fn create_session(
        &self,
        meta: &SessionMeta,
        state: &SessionState,
        character: Option<&CharacterRecord>,
        init_line: &str,
    ) -> Result<()>;
    fn load_meta(&self, slug: &str) -> Result<SessionMeta>;
    fn load_state(&self, slug: &str) -> Result<SessionState>;
    /// Atomic (all-or-nothing visibility) state replacement.
    fn save_state(&self, slug: &str, state: &SessionState) -> Result<()>;

    // ── Append-only logs ──────────────────────────────────────────
    fn append_transcript(&self, slug: &str, lines: &[String]) -> Result<u64>;
    fn append_changelog(&self, slug: &str, lines: &[String]) -> Result<u64>;
    fn load_transcript(
        &self,
        slug: &str,
        tail: Option<usize>,
        cursor: Option<u64>,
    ) -> Result<LogPage>;
    fn load_changelog(
        &self,
        slug: &str,
        tail: Option<usize>,
        cursor: Option<u64>,
    ) -> Result<LogPage>;
    fn transcript_len(&self, slug: &str) -> Result<u64>;
    fn changelog_len(&self, slug: &str) -> Result<u64>;

    // ── Turn records ──────────────────────────────────────────────
    /// At most one record per `(session, turn)`; duplicate is `Conflict`.
    fn persist_turn_record(&self, slug: &str, record: &TurnRecord) -> Result<()>;
    fn load_turn_records(&self, slug: &str, limit: usize) -> Result<Vec<TurnRecord>>;
    fn load_turn_record(&self, slug: &str, turn: u64) -> Result<Option<TurnRecord>>;
    fn append_rolls_to_turn(&self, slug: &str, turn: u64, rolls: &[RollResult]) -> Result<()>;

    // ── Previews ──────────────────────────────────────────────────
    fn save_preview(&self, slug: &str, preview: &Preview) -> Result<()>;
    fn load_preview(&self, slug: &str, id: &str) -> Result<Option<Preview>>;
    /// Idempotent.
    fn delete_preview(&self, slug: &str, id: &str) -> Result<()>;
    fn list_previews(&self, slug: &str) -> Result<Vec<Preview>>;

    // ── Locks ─────────────────────────────────────────────────────
    /// Atomic claim: succeeds when no live lock exists, the existing
    /// lock expired, or the claimant already owns it (refresh).
    /// Otherwise `LockHeld`.
    fn claim_lock(&self, slug: &str, owner: &str, ttl_secs: u64) -> Result<LockState>;
    /// Remove the lock when `owner` matches or is `None`; otherwise
    /// `LockOwnerMismatch`.
    fn release_lock(&self, slug: &str, owner: Option<&str>) -> Result<()>;
    fn get_lock(&self, slug: &str) -> Result<Option<LockState>>;

    // ── Atomic turn commit ────────────────────────────────────────
    /// Apply the whole write set with all-or-nothing visibility.
    fn commit_turn(&self, slug: &str, write: &CommitWrite) -> Result<CommitReceipt>;

    // ── Snapshots ─────────────────────────────────────────────────
    /// `Conflict` on duplicate `save_id`.
    fn create_snapshot(&self, slug: &str, snapshot: &Snapshot) -> Result<()>;
    fn list_snapshots(&self, slug: &str, limit: usize) -> Result<Vec<SnapshotSummary>>;
    fn load_snapshot(&self, slug: &str, save_id: &str) -> Result<Option<Snapshot>>;

    // ── Characters ────────────────────────────────────────────────
    fn load_character(&self, slug: &str) -> Result<Option<CharacterRecord>>;
    /// Save the session-local copy; when `persist_shared`, mirror to
    /// the shared catalog under the character's own slug.
    fn save_character(
        &self,
        slug: &str,
        character: &CharacterRecord,
        persist_shared: bool,
    ) -> Result<()>;
    fn load_shared_character(&self, character_slug: &str) -> Result<Option<CharacterRecord>>;

    // ── Auxiliary documents ───────────────────────────────────────
    fn load_doc(&self, slug: &str, kind: DocKind) -> Result<Option<Value>>;
    fn save_doc(&self, slug: &str, kind: DocKind, payload: &Value) -> Result<()>;

    // ── Entropy stream (process-wide) ─────────────────────────────
    fn entropy_len(&self) -> Result<u64>;
    fn load_entropy(&self, index: u64) -> Result<Option<EntropyEntry>>;
    fn peek_entropy(&self, limit: usize) -> Result<Vec<EntropyEntry>>;
    /// Append entries; returns the new stream length.
    fn append_entropy(&self, entries: &[EntropyEntry]) -> Result<u64>;
}

/// Open the configured backend.
pub fn open_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.storage.backend {
        StorageBackend::File => Arc::new(FsStorage::open(&config.storage.data_root)?),
        StorageBackend::Sqlite => Arc::new(SqliteStorage::open(&config.storage.database_path)?),
    };
    Ok(storage)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared line discipline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize log lines so both backends count identically: embedded
/// newlines become spaces, blank lines are dropped.
pub(crate) fn sanitize_lines(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| line.replace(['\r', '\n'], " ").trim().to_owned())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Page a full log into `LogPage` honoring cursor-then-tail semantics.
pub(crate) fn page_log(all: Vec<String>, tail: Option<usize>, cursor: Option<u64>) -> LogPage {
    let total = all.len() as u64;
    let mut items: Vec<tf_domain::model::LogItem> = all
        .into_iter()
        .enumerate()
        .map(|(i, text)| tf_domain::model::LogItem {
            id: i as u64 + 1,
            text,
        })
        .collect();

    if let Some(cursor) = cursor {
        items.retain(|item| item.id > cursor);
    }
    if let Some(tail) = tail {
        if items.len() > tail {
            items.drain(..items.len() - tail);
        }
    }

    LogPage {
        items,
        cursor: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_drops_blanks_and_folds_newlines() {
        let lines = vec![
            "one".to_owned(),
            "".to_owned(),
            "  ".to_owned(),
            "two\nlines".to_owned(),
        ];
        assert_eq!(sanitize_lines(&lines), vec!["one", "two lines"]);
    }

    #[test]
    fn paging_cursor_then_tail() {
        let all: Vec<String> = (1..=10).map(|i| format!("line {i}")).collect();

        let page = page_log(all.clone(), None, Some(7));
        assert_eq!(page.cursor, 10);
        assert_eq!(
            page.items.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![8, 9, 10]
        );

        let page = page_log(all.clone(), Some(2), None);
        assert_eq!(
            page.items.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![9, 10]
        );

        let page = page_log(all, Some(2), Some(9));
        assert_eq!(page.items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![10]);
    }
}
