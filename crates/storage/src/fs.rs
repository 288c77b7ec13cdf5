//! Filesystem backend.
//!
//! Layout under the data root:
//!
//! ```text
//! sessions/<slug>/
//!   session.json     — metadata (world, timestamps)
//!   state.json       — the authoritative state document
//!   transcript.md    — one entry per non-blank line
//!   changelog.md     — one JSON object per line
//!   turns/<N>.json   — turn records
//!   previews/<id>.json
//!   LOCK             — presence = held; JSON lease body
//!   saves/<save_id>.json
//!   docs/<kind>.json
//!   character.json
//! characters/<slug>.json  — shared catalog
//! entropy/stream.jsonl    — the global stream, index = line number
//! ```
//!
//! Every JSON document is written temp-then-rename so readers never
//! observe a torn file. The turn commit stages its writes in a fixed
//! order and reverses completed steps on failure.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use tf_domain::model::{
    CharacterRecord, DocKind, EntropyEntry, LockState, LogPage, Preview, RollResult, SessionMeta,
    SessionState, SessionSummary, Snapshot, SnapshotSummary, TurnRecord,
};
use tf_domain::{Error, Result};

use crate::{page_log, sanitize_lines, CommitReceipt, CommitWrite, Storage};

pub struct FsStorage {
    root: PathBuf,
    /// Serializes lock-file claim evaluation within this process. The
    /// on-disk primitive for fresh claims is `create_new` (O_EXCL).
    claim_guard: Mutex<()>,
    /// Serializes entropy appends so line numbering stays dense.
    entropy_guard: Mutex<()>,
}

impl FsStorage {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join("sessions"))?;
        fs::create_dir_all(root.join("characters"))?;
        fs::create_dir_all(root.join("entropy"))?;
        tracing::info!(root = %root.display(), "file storage ready");
        Ok(Self {
            root: root.to_path_buf(),
            claim_guard: Mutex::new(()),
            entropy_guard: Mutex::new(()),
        })
    }

    // ── path helpers ──────────────────────────────────────────────

    fn session_dir(&self, slug: &str) -> Result<PathBuf> {
        check_slug(slug)?;
        Ok(self.root.join("sessions").join(slug))
    }

    fn existing_session_dir(&self, slug: &str) -> Result<PathBuf> {
        let dir = self.session_dir(slug)?;
        if !dir.join("session.json").is_file() {
            return Err(Error::SessionMissing(slug.to_owned()));
        }
        Ok(dir)
    }

    fn entropy_path(&self) -> PathBuf {
        self.root.join("entropy").join("stream.jsonl")
    }

    fn touch_meta(&self, slug: &str) -> Result<()> {
        let dir = self.existing_session_dir(slug)?;
        let mut meta: SessionMeta = read_json(&dir.join("session.json"))?;
        meta.updated_at = Utc::now();
        write_json_atomic(&dir.join("session.json"), &meta)
    }

    fn read_log_lines(&self, slug: &str, file: &str) -> Result<Vec<String>> {
        let path = self.existing_session_dir(slug)?.join(file);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect())
    }

    fn append_log_lines(&self, slug: &str, file: &str, lines: &[String]) -> Result<u64> {
        let dir = self.existing_session_dir(slug)?;
        let clean = sanitize_lines(lines);
        append_lines(&dir.join(file), &clean)?;
        Ok(self.read_log_lines(slug, file)?.len() as u64)
    }
}

impl Storage for FsStorage {
    // ── Session lifecycle ─────────────────────────────────────────

    fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        let sessions_dir = self.root.join("sessions");
        for entry in fs::read_dir(&sessions_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let slug = entry.file_name().to_string_lossy().into_owned();
            let meta_path = entry.path().join("session.json");
            if !meta_path.is_file() {
                continue;
            }
            let meta: SessionMeta = read_json(&meta_path)?;
            let has_lock = self
                .get_lock(&slug)?
                .is_some_and(|lock| !lock.is_expired(Utc::now()));
            summaries.push(SessionSummary {
                slug,
                world: meta.world,
                has_lock,
                updated_at: meta.updated_at,
            });
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    fn session_exists(&self, slug: &str) -> Result<bool> {
        Ok(self.session_dir(slug)?.join("session.json").is_file())
    }

    fn create_session(
        &self,
        meta: &SessionMeta,
        state: &SessionState,
        character: Option<&CharacterRecord>,
        init_line: &str,
    ) -> Result<()> {
        let dir = self.session_dir(&meta.slug)?;
        if dir.join("session.json").is_file() {
            return Err(Error::Conflict(format!("session {} exists", meta.slug)));
        }
        fs::create_dir_all(dir.join("turns"))?;
        fs::create_dir_all(dir.join("previews"))?;
        fs::create_dir_all(dir.join("saves"))?;
        fs::create_dir_all(dir.join("docs"))?;

        write_json_atomic(&dir.join("state.json"), state)?;
        if let Some(character) = character {
            write_json_atomic(&dir.join("character.json"), character)?;
        }
        append_lines(
            &dir.join("changelog.md"),
            &sanitize_lines(&[init_line.to_owned()]),
        )?;
        // Meta last: its presence marks the session as fully created.
        write_json_atomic(&dir.join("session.json"), meta)?;
        Ok(())
    }

    fn load_meta(&self, slug: &str) -> Result<SessionMeta> {
        read_json(&self.existing_session_dir(slug)?.join("session.json"))
    }

    fn load_state(&self, slug: &str) -> Result<SessionState> {
        read_json(&self.existing_session_dir(slug)?.join("state.json"))
    }

    fn save_state(&self, slug: &str, state: &SessionState) -> Result<()> {
        let dir = self.existing_session_dir(slug)?;
        write_json_atomic(&dir.join("state.json"), state)?;
        self.touch_meta(slug)
    }

    // ── Append-only logs ──────────────────────────────────────────

    fn append_transcript(&self, slug: &str, lines: &[String]) -> Result<u64> {
        self.append_log_lines(slug, "transcript.md", lines)
    }

    fn append_changelog(&self, slug: &str, lines: &[String]) -> Result<u64> {
        self.append_log_lines(slug, "changelog.md", lines)
    }

    fn load_transcript(
        &self,
        slug: &str,
        tail: Option<usize>,
        cursor: Option<u64>,
    ) -> Result<LogPage> {
        Ok(page_log(
            self.read_log_lines(slug, "transcript.md")?,
            tail,
            cursor,
        ))
    }

    fn load_changelog(
        &self,
        slug: &str,
        tail: Option<usize>,
        cursor: Option<u64>,
    ) -> Result<LogPage> {
        Ok(page_log(
            self.read_log_lines(slug, "changelog.md")?,
            tail,
            cursor,
        ))
    }

    fn transcript_len(&self, slug: &str) -> Result<u64> {
        Ok(self.read_log_lines(slug, "transcript.md")?.len() as u64)
    }

    fn changelog_len(&self, slug: &str) -> Result<u64> {
        Ok(self.read_log_lines(slug, "changelog.md")?.len() as u64)
    }

    // ── Turn records ──────────────────────────────────────────────

    fn persist_turn_record(&self, slug: &str, record: &TurnRecord) -> Result<()> {
        let path = self
            .existing_session_dir(slug)?
            .join("turns")
            .join(format!("{}.json", record.turn));
        if path.exists() {
            return Err(Error::Conflict(format!(
                "turn record {} already exists for {slug}",
                record.turn
            )));
        }
        write_json_atomic(&path, record)
    }

    fn load_turn_records(&self, slug: &str, limit: usize) -> Result<Vec<TurnRecord>> {
        let dir = self.existing_session_dir(slug)?.join("turns");
        let mut turns: Vec<u64> = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(turn) = stem.parse::<u64>() {
                        turns.push(turn);
                    }
                }
            }
        }
        turns.sort_unstable_by(|a, b| b.cmp(a));
        turns.truncate(limit);

        let mut records = Vec::with_capacity(turns.len());
        for turn in turns {
            records.push(read_json(&dir.join(format!("{turn}.json")))?);
        }
        Ok(records)
    }

    fn load_turn_record(&self, slug: &str, turn: u64) -> Result<Option<TurnRecord>> {
        let path = self
            .existing_session_dir(slug)?
            .join("turns")
            .join(format!("{turn}.json"));
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn append_rolls_to_turn(&self, slug: &str, turn: u64, rolls: &[RollResult]) -> Result<()> {
        let path = self
            .existing_session_dir(slug)?
            .join("turns")
            .join(format!("{turn}.json"));
        if !path.exists() {
            return Err(Error::Conflict(format!("no turn record {turn} for {slug}")));
        }
        let mut record: TurnRecord = read_json(&path)?;
        record.rolls.extend(rolls.iter().cloned());
        write_json_atomic(&path, &record)
    }

    // ── Previews ──────────────────────────────────────────────────

    fn save_preview(&self, slug: &str, preview: &Preview) -> Result<()> {
        let dir = self.existing_session_dir(slug)?.join("previews");
        fs::create_dir_all(&dir)?;
        write_json_atomic(&dir.join(format!("{}.json", preview.id)), preview)
    }

    fn load_preview(&self, slug: &str, id: &str) -> Result<Option<Preview>> {
        check_slug(id)?;
        let path = self
            .existing_session_dir(slug)?
            .join("previews")
            .join(format!("{id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn delete_preview(&self, slug: &str, id: &str) -> Result<()> {
        check_slug(id)?;
        let path = self
            .existing_session_dir(slug)?
            .join("previews")
            .join(format!("{id}.json"));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_previews(&self, slug: &str) -> Result<Vec<Preview>> {
        let dir = self.existing_session_dir(slug)?.join("previews");
        let mut previews = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "json") {
                    previews.push(read_json(&path)?);
                }
            }
        }
        previews.sort_by(|a: &Preview, b: &Preview| a.created_at.cmp(&b.created_at));
        Ok(previews)
    }

    // ── Locks ─────────────────────────────────────────────────────

    fn claim_lock(&self, slug: &str, owner: &str, ttl_secs: u64) -> Result<LockState> {
        let path = self.existing_session_dir(slug)?.join("LOCK");
        let lease = LockState {
            owner: owner.to_owned(),
            ttl_secs,
            acquired_at: Utc::now(),
        };

        let _guard = self.claim_guard.lock();

        // Fresh claim: O_EXCL create is the atomic arbiter for a burst
        // of concurrent claimants on an unlocked session.
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let body = serde_json::to_string_pretty(&lease)?;
                file.write_all(body.as_bytes())?;
                file.sync_all()?;
                return Ok(lease);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        // Held: allow same-owner refresh and expired takeover, both via
        // rename so readers never see a torn lease.
        let current: Option<LockState> = match read_json(&path) {
            Ok(lock) => Some(lock),
            Err(_) => {
                tracing::warn!(slug, "unreadable lock file, treating as expired");
                None
            }
        };
        match current {
            Some(current) if current.owner != owner && !current.is_expired(Utc::now()) => {
                Err(Error::LockHeld {
                    owner: current.owner,
                })
            }
            _ => {
                write_json_atomic(&path, &lease)?;
                Ok(lease)
            }
        }
    }

    fn release_lock(&self, slug: &str, owner: Option<&str>) -> Result<()> {
        let path = self.existing_session_dir(slug)?.join("LOCK");
        let _guard = self.claim_guard.lock();
        if !path.exists() {
            return Ok(());
        }
        if let Some(owner) = owner {
            let current: LockState = read_json(&path)?;
            if current.owner != owner {
                return Err(Error::LockOwnerMismatch);
            }
        }
        fs::remove_file(&path)?;
        Ok(())
    }

    fn get_lock(&self, slug: &str) -> Result<Option<LockState>> {
        let path = self.existing_session_dir(slug)?.join("LOCK");
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    // ── Atomic turn commit ────────────────────────────────────────

    fn commit_turn(&self, slug: &str, write: &CommitWrite) -> Result<CommitReceipt> {
        let dir = self.existing_session_dir(slug)?;
        let state_path = dir.join("state.json");
        let transcript_path = dir.join("transcript.md");
        let changelog_path = dir.join("changelog.md");

        let prev_state = fs::read(&state_path)?;
        let transcript_bytes = file_len(&transcript_path)?;
        let changelog_bytes = file_len(&changelog_path)?;

        // Step 1: state. Nothing to reverse if this fails.
        write_json_atomic(&state_path, &write.state)?;

        // Step 2: transcript append.
        if let Err(e) = append_lines(&transcript_path, &sanitize_lines(&write.transcript_lines)) {
            restore_bytes(&state_path, &prev_state);
            return Err(e);
        }

        // Step 3: changelog append.
        if let Err(e) = append_lines(&changelog_path, &sanitize_lines(&write.changelog_lines)) {
            truncate_to(&transcript_path, transcript_bytes);
            restore_bytes(&state_path, &prev_state);
            return Err(e);
        }

        // Step 4: turn record.
        if let Some(record) = &write.turn_record {
            let record_path = dir.join("turns").join(format!("{}.json", record.turn));
            if record_path.exists() {
                truncate_to(&changelog_path, changelog_bytes);
                truncate_to(&transcript_path, transcript_bytes);
                restore_bytes(&state_path, &prev_state);
                return Err(Error::Conflict(format!(
                    "turn record {} already exists for {slug}",
                    record.turn
                )));
            }
            if let Err(e) = write_json_atomic(&record_path, record) {
                let _ = fs::remove_file(&record_path);
                truncate_to(&changelog_path, changelog_bytes);
                truncate_to(&transcript_path, transcript_bytes);
                restore_bytes(&state_path, &prev_state);
                return Err(e);
            }
        }

        // Step 5: consume the preview. Losing this delete cannot corrupt
        // the session (a leftover preview fails at its own commit as
        // stale), so it does not trigger reversal.
        if let Some(id) = &write.delete_preview_id {
            if let Err(e) = self.delete_preview(slug, id) {
                tracing::warn!(slug, preview = %id, error = %e, "preview delete failed after commit");
            }
        }

        // The commit itself is durable at this point.
        if let Err(e) = self.touch_meta(slug) {
            tracing::warn!(slug, error = %e, "meta touch failed after commit");
        }

        Ok(CommitReceipt {
            transcript_len: self.transcript_len(slug)?,
            changelog_len: self.changelog_len(slug)?,
        })
    }

    // ── Snapshots ─────────────────────────────────────────────────

    fn create_snapshot(&self, slug: &str, snapshot: &Snapshot) -> Result<()> {
        check_slug(&snapshot.save_id)?;
        let dir = self.existing_session_dir(slug)?.join("saves");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", snapshot.save_id));
        if path.exists() {
            return Err(Error::Conflict(format!(
                "save {} already exists",
                snapshot.save_id
            )));
        }
        write_json_atomic(&path, snapshot)
    }

    fn list_snapshots(&self, slug: &str, limit: usize) -> Result<Vec<SnapshotSummary>> {
        let dir = self.existing_session_dir(slug)?.join("saves");
        let mut snapshots: Vec<Snapshot> = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "json") {
                    snapshots.push(read_json(&path)?);
                }
            }
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots.truncate(limit);
        Ok(snapshots
            .into_iter()
            .map(|s| SnapshotSummary {
                save_id: s.save_id,
                save_type: s.save_type,
                created_at: s.created_at,
                turn: s.state.turn,
            })
            .collect())
    }

    fn load_snapshot(&self, slug: &str, save_id: &str) -> Result<Option<Snapshot>> {
        check_slug(save_id)?;
        let path = self
            .existing_session_dir(slug)?
            .join("saves")
            .join(format!("{save_id}.json"));
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    // ── Characters ────────────────────────────────────────────────

    fn load_character(&self, slug: &str) -> Result<Option<CharacterRecord>> {
        let path = self.existing_session_dir(slug)?.join("character.json");
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn save_character(
        &self,
        slug: &str,
        character: &CharacterRecord,
        persist_shared: bool,
    ) -> Result<()> {
        let dir = self.existing_session_dir(slug)?;
        write_json_atomic(&dir.join("character.json"), character)?;
        if persist_shared {
            check_slug(&character.slug)?;
            let shared = self
                .root
                .join("characters")
                .join(format!("{}.json", character.slug));
            write_json_atomic(&shared, character)?;
        }
        self.touch_meta(slug)
    }

    fn load_shared_character(&self, character_slug: &str) -> Result<Option<CharacterRecord>> {
        check_slug(character_slug)?;
        let path = self
            .root
            .join("characters")
            .join(format!("{character_slug}.json"));
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    // ── Auxiliary documents ───────────────────────────────────────

    fn load_doc(&self, slug: &str, kind: DocKind) -> Result<Option<Value>> {
        let path = self
            .existing_session_dir(slug)?
            .join("docs")
            .join(format!("{kind}.json"));
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    fn save_doc(&self, slug: &str, kind: DocKind, payload: &Value) -> Result<()> {
        let dir = self.existing_session_dir(slug)?.join("docs");
        fs::create_dir_all(&dir)?;
        write_json_atomic(&dir.join(format!("{kind}.json")), payload)?;
        self.touch_meta(slug)
    }

    // ── Entropy stream ────────────────────────────────────────────

    fn entropy_len(&self) -> Result<u64> {
        let path = self.entropy_path();
        if !path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(raw.lines().filter(|l| !l.trim().is_empty()).count() as u64)
    }

    fn load_entropy(&self, index: u64) -> Result<Option<EntropyEntry>> {
        if index == 0 {
            return Ok(None);
        }
        let path = self.entropy_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        match raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .nth(index as usize - 1)
        {
            Some(line) => Ok(Some(serde_json::from_str(line)?)),
            None => Ok(None),
        }
    }

    fn peek_entropy(&self, limit: usize) -> Result<Vec<EntropyEntry>> {
        let path = self.entropy_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .take(limit)
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    fn append_entropy(&self, entries: &[EntropyEntry]) -> Result<u64> {
        let _guard = self.entropy_guard.lock();
        let len = self.entropy_len()?;
        if let Some(first) = entries.first() {
            if first.index != len + 1 {
                return Err(Error::Conflict(format!(
                    "entropy append must continue at {}, got {}",
                    len + 1,
                    first.index
                )));
            }
        }
        let lines: Vec<String> = entries
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<_, _>>()?;
        append_lines(&self.entropy_path(), &lines)?;
        Ok(len + entries.len() as u64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reject identifiers that could escape the session tree.
fn check_slug(slug: &str) -> Result<()> {
    let ok = !slug.is_empty()
        && slug.len() <= 128
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::SchemaViolation(format!("invalid identifier {slug:?}")))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Durable-rename write: temp file in the same directory, fsync, rename.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    write_bytes_atomic(path, body.as_bytes())
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent for {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buf.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn file_len(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Rollback helpers: best effort, failures are logged not propagated.

fn restore_bytes(path: &Path, bytes: &[u8]) {
    if let Err(e) = write_bytes_atomic(path, bytes) {
        tracing::error!(path = %path.display(), error = %e, "rollback restore failed");
    }
}

fn truncate_to(path: &Path, len: u64) {
    let result = OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len));
    if let Err(e) = result {
        tracing::error!(path = %path.display(), error = %e, "rollback truncate failed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, FsStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::open(dir.path()).unwrap();
        (dir, storage)
    }

    fn seed_session(storage: &FsStorage, slug: &str) {
        let now = Utc::now();
        storage
            .create_session(
                &SessionMeta {
                    slug: slug.to_owned(),
                    world: "greyvale".into(),
                    created_at: now,
                    updated_at: now,
                },
                &SessionState::starter(),
                None,
                r#"{"event":"session_created"}"#,
            )
            .unwrap();
    }

    #[test]
    fn create_load_roundtrip() {
        let (_dir, storage) = fixture();
        seed_session(&storage, "alpha");

        let state = storage.load_state("alpha").unwrap();
        assert_eq!(state.turn, 0);
        assert_eq!(storage.changelog_len("alpha").unwrap(), 1);
        assert_eq!(storage.transcript_len("alpha").unwrap(), 0);

        assert!(matches!(
            storage.load_state("missing"),
            Err(Error::SessionMissing(_))
        ));
    }

    #[test]
    fn duplicate_create_conflicts() {
        let (_dir, storage) = fixture();
        seed_session(&storage, "alpha");
        let now = Utc::now();
        let err = storage
            .create_session(
                &SessionMeta {
                    slug: "alpha".into(),
                    world: "w".into(),
                    created_at: now,
                    updated_at: now,
                },
                &SessionState::starter(),
                None,
                "{}",
            )
            .unwrap_err();
        assert_eq!(err.kind(), "Conflict");
    }

    #[test]
    fn blank_lines_do_not_count() {
        let (_dir, storage) = fixture();
        seed_session(&storage, "alpha");

        storage
            .append_transcript(
                "alpha",
                &["first".into(), "".into(), "second\nwrapped".into()],
            )
            .unwrap();
        let page = storage.load_transcript("alpha", None, None).unwrap();
        assert_eq!(page.cursor, 2);
        assert_eq!(page.items[1].text, "second wrapped");
    }

    #[test]
    fn lock_claim_refresh_and_conflict() {
        let (_dir, storage) = fixture();
        seed_session(&storage, "alpha");

        storage.claim_lock("alpha", "alice", 60).unwrap();
        // Refresh by the same owner succeeds.
        storage.claim_lock("alpha", "alice", 60).unwrap();
        // A different owner is refused while the lease is live.
        let err = storage.claim_lock("alpha", "bob", 60).unwrap_err();
        assert!(matches!(err, Error::LockHeld { ref owner } if owner == "alice"));

        // Wrong-owner release refused; owner release clears it.
        assert!(matches!(
            storage.release_lock("alpha", Some("bob")),
            Err(Error::LockOwnerMismatch)
        ));
        storage.release_lock("alpha", Some("alice")).unwrap();
        assert!(storage.get_lock("alpha").unwrap().is_none());
    }

    #[test]
    fn concurrent_claim_burst_has_one_winner() {
        let (_dir, storage) = fixture();
        seed_session(&storage, "alpha");
        let storage = std::sync::Arc::new(storage);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = storage.clone();
                std::thread::spawn(move || storage.claim_lock("alpha", &format!("owner-{i}"), 60))
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join())
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn entropy_append_and_load() {
        let (_dir, storage) = fixture();
        let entries: Vec<EntropyEntry> = (1..=3)
            .map(|index| EntropyEntry {
                index,
                d20: vec![index as u8; 4],
                d100: vec![50],
                raw: None,
            })
            .collect();
        assert_eq!(storage.append_entropy(&entries).unwrap(), 3);
        assert_eq!(storage.entropy_len().unwrap(), 3);
        assert_eq!(storage.load_entropy(2).unwrap().unwrap().d20, vec![2; 4]);
        assert!(storage.load_entropy(4).unwrap().is_none());

        // Non-dense append is refused.
        let err = storage
            .append_entropy(&[EntropyEntry {
                index: 9,
                d20: vec![],
                d100: vec![],
                raw: None,
            }])
            .unwrap_err();
        assert_eq!(err.kind(), "Conflict");
    }

    #[test]
    fn snapshot_id_collision_conflicts() {
        let (_dir, storage) = fixture();
        seed_session(&storage, "alpha");
        let snapshot = Snapshot {
            save_id: "save-1".into(),
            save_type: tf_domain::model::SaveType::Manual,
            created_at: Utc::now(),
            state: SessionState::starter(),
            character: None,
        };
        storage.create_snapshot("alpha", &snapshot).unwrap();
        let err = storage.create_snapshot("alpha", &snapshot).unwrap_err();
        assert_eq!(err.kind(), "Conflict");
    }

    #[test]
    fn path_escape_rejected() {
        let (_dir, storage) = fixture();
        assert!(storage.load_state("../alpha").is_err());
        assert!(storage.session_exists("a/b").is_err());
    }
}
