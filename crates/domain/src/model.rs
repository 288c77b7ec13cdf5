//! The session data model: state, logs, turn records, previews, locks,
//! entropy entries, snapshots, and characters.
//!
//! `SessionState` is a tagged-document type: a typed root with the
//! fields the engine enforces invariants on, plus a free-form
//! extensions map so adventures can carry whatever else they need.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session & state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One row of `GET /v1/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub slug: String,
    pub world: String,
    pub has_lock: bool,
    pub updated_at: DateTime<Utc>,
}

/// Per-session metadata kept outside the hashed state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub slug: String,
    pub world: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The authoritative mutable document for a session.
///
/// `turn` and `log_index` are engine-owned: a state patch may never set
/// them directly, and commits advance them according to the turn
/// protocol. Everything else is adventure data.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionState {
    #[serde(default)]
    pub turn: u64,
    /// Highest entropy index this session has consumed.
    #[serde(default)]
    pub log_index: u64,
    #[serde(default)]
    pub hp: i64,
    #[serde(default)]
    pub max_hp: i64,
    #[serde(default)]
    pub ac: i64,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub flags: Map<String, Value>,
    #[serde(default)]
    pub gold: i64,
    #[serde(default)]
    pub spells: Vec<String>,
    /// Open-ended adventure fields not modeled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionState {
    /// Minimal playable state used when no template session exists yet.
    pub fn starter() -> Self {
        Self {
            hp: 10,
            max_hp: 10,
            ac: 12,
            location: String::new(),
            gold: 10,
            ..Self::default()
        }
    }

    /// Reset the bookkeeping a template clone must not inherit.
    pub fn reset_for_new_session(&mut self) {
        self.turn = 0;
        self.log_index = 0;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One transcript or changelog entry. `id` is the 1-based position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogItem {
    pub id: u64,
    pub text: String,
}

/// A paginated read of an append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPage {
    pub items: Vec<LogItem>,
    /// Position of the last entry in the log (not the page); pass it
    /// back as `?cursor=` to read only newer entries.
    pub cursor: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The DM payload persisted with a narrated turn.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DmTurn {
    pub narration: String,
    #[serde(default)]
    pub recap: String,
    #[serde(default)]
    pub stakes: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll_request: Option<RollRequest>,
    /// Present when the narration surfaced a new discovery; persisted
    /// to the discovery log at commit time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_added: Option<Value>,
}

/// A roll the DM asks the player to make next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollRequest {
    pub expression: String,
    #[serde(default)]
    pub reason: String,
}

/// Record stored per committed turn; at most one per `(session, turn)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn: u64,
    pub player_intent: String,
    pub diff: Vec<DiffEntry>,
    #[serde(default)]
    pub consequence_echo: String,
    pub dm: DmTurn,
    pub created_at: DateTime<Utc>,
    /// Ad-hoc rolls appended after the turn was recorded.
    #[serde(default)]
    pub rolls: Vec<RollResult>,
}

/// One leaf-path change in a state diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub changes: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Previews
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A reservation witness for a proposed turn.
///
/// Created by preview, destroyed by commit or garbage collection.
/// `base_turn` and `base_hash` pin the state the proposal was computed
/// against; any drift fails the commit with `PreviewStale`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preview {
    pub id: String,
    pub base_turn: u64,
    pub base_hash: String,
    pub response: String,
    pub state_patch: Value,
    pub transcript_entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog_entry: Option<Value>,
    pub dice_expressions: Vec<String>,
    /// Contiguous entropy indices starting at `log_index + 1`.
    pub reserved_indices: Vec<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_owner: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Locks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An owner/TTL-scoped mutual-exclusion lease on a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockState {
    pub owner: String,
    pub ttl_secs: u64,
    pub acquired_at: DateTime<Utc>,
}

impl LockState {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.acquired_at + Duration::seconds(self.ttl_secs as i64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entropy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One pre-rolled entry of the global entropy stream. Indices are
/// 1-based and dense; entries are immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntropyEntry {
    pub index: u64,
    /// Pre-rolled d20 values, each in 1..=20.
    pub d20: Vec<u8>,
    /// Pre-rolled d100 values, each in 1..=100.
    pub d100: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
}

/// The result of evaluating one roll expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: String,
    /// Raw values drawn from the entry pools, before die-size mapping.
    pub rolls: Vec<u8>,
    pub total: i64,
    pub breakdown: String,
    pub consumed_indices: Vec<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveType {
    Auto,
    Manual,
}

/// A point-in-time capture of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub save_id: String,
    pub save_type: SaveType,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterRecord>,
}

/// Listing row for `GET /v1/sessions/:slug/saves`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub save_id: String,
    pub save_type: SaveType,
    pub created_at: DateTime<Utc>,
    pub turn: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Characters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A character sheet. The session-local copy is authoritative during
/// play; the shared catalog copy seeds template clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub sheet: Value,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auxiliary documents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whole-document-replace JSON blobs attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocKind {
    Mood,
    Discoveries,
    NpcMemory,
    NpcRelations,
    LastDiscovery,
    AutosaveMeta,
}

impl DocKind {
    pub const ALL: [DocKind; 6] = [
        DocKind::Mood,
        DocKind::Discoveries,
        DocKind::NpcMemory,
        DocKind::NpcRelations,
        DocKind::LastDiscovery,
        DocKind::AutosaveMeta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mood => "mood",
            Self::Discoveries => "discoveries",
            Self::NpcMemory => "npc-memory",
            Self::NpcRelations => "npc-relations",
            Self::LastDiscovery => "last-discovery",
            Self::AutosaveMeta => "autosave-meta",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrips_with_extra_fields() {
        let raw = serde_json::json!({
            "turn": 3,
            "log_index": 7,
            "hp": 9,
            "max_hp": 12,
            "ac": 14,
            "location": "crypt",
            "conditions": ["poisoned"],
            "inventory": ["rope", "torch"],
            "flags": {"met_hermit": true},
            "gold": 42,
            "spells": ["light"],
            "weather": "raining",
            "party_morale": 7
        });

        let state: SessionState = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(state.turn, 3);
        assert_eq!(state.extra.get("weather").unwrap(), "raining");

        let back = serde_json::to_value(&state).unwrap();
        assert_eq!(back.get("party_morale").unwrap(), 7);
        assert_eq!(back.get("location").unwrap(), "crypt");
    }

    #[test]
    fn unknown_currency_key_lands_in_extra() {
        let state: SessionState =
            serde_json::from_value(serde_json::json!({ "gp": 17 })).unwrap();
        assert_eq!(state.gold, 0);
        assert_eq!(state.extra.get("gp").unwrap(), 17);
    }

    #[test]
    fn lock_expiry() {
        let lock = LockState {
            owner: "alice".into(),
            ttl_secs: 60,
            acquired_at: Utc::now() - Duration::seconds(120),
        };
        assert!(lock.is_expired(Utc::now()));

        let fresh = LockState {
            owner: "alice".into(),
            ttl_secs: 60,
            acquired_at: Utc::now(),
        };
        assert!(!fresh.is_expired(Utc::now()));
    }

    #[test]
    fn doc_kind_parse_roundtrip() {
        for kind in DocKind::ALL {
            assert_eq!(DocKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(DocKind::parse("weather"), None);
    }
}
