//! SQLite backend.
//!
//! The logical model maps onto a relational schema; the turn commit
//! runs inside a single transaction so readers see all artifacts of a
//! commit or none. Lock claims are a single conditional upsert keyed on
//! `session_id`, with expiry evaluated in SQL against the lease.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;

use tf_domain::model::{
    CharacterRecord, DocKind, EntropyEntry, LockState, LogPage, Preview, RollResult, SessionMeta,
    SessionState, SessionSummary, Snapshot, SnapshotSummary, TurnRecord,
};
use tf_domain::{Error, Result};

use crate::{page_log, sanitize_lines, CommitReceipt, CommitWrite, Storage};

/// Sentinel `session_id` for shared-catalog character rows.
const SHARED_SESSION_ID: i64 = 0;

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_err)?;
        // journal_mode returns a result row; query it rather than execute.
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| {
            row.get::<_, String>(0)
        })
        .map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
        init_schema(&conn)?;
        tracing::info!(path = %db_path.display(), "sqlite storage ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            world TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_state (
            session_id INTEGER PRIMARY KEY REFERENCES sessions(id),
            state_json TEXT NOT NULL,
            turn_number INTEGER NOT NULL,
            log_index INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS text_entries (
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            kind TEXT NOT NULL CHECK (kind IN ('transcript', 'changelog')),
            position INTEGER NOT NULL,
            content TEXT NOT NULL,
            UNIQUE (session_id, kind, position)
        );

        CREATE TABLE IF NOT EXISTS turns (
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            turn_number INTEGER NOT NULL,
            turn_record_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (session_id, turn_number)
        );

        CREATE TABLE IF NOT EXISTS previews (
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            preview_id TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (session_id, preview_id)
        );

        CREATE TABLE IF NOT EXISTS locks (
            session_id INTEGER PRIMARY KEY REFERENCES sessions(id),
            owner TEXT NOT NULL,
            ttl_seconds INTEGER NOT NULL,
            acquired_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS characters (
            session_id INTEGER NOT NULL,
            slug TEXT NOT NULL,
            character_json TEXT NOT NULL,
            is_shared INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (session_id, slug)
        );

        CREATE TABLE IF NOT EXISTS entropy (
            entropy_index INTEGER PRIMARY KEY,
            entropy_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            save_id TEXT NOT NULL,
            save_type TEXT NOT NULL,
            snapshot_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (session_id, save_id)
        );

        CREATE TABLE IF NOT EXISTS session_docs (
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            UNIQUE (session_id, kind)
        );

        CREATE INDEX IF NOT EXISTS idx_text_entries ON text_entries(session_id, kind, position);
        CREATE INDEX IF NOT EXISTS idx_turns ON turns(session_id, turn_number);
        "#,
    )
    .map_err(db_err)?;
    Ok(())
}

// ── row helpers ─────────────────────────────────────────────────────

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn ts(dt: DateTime<Utc>) -> String {
    // Millisecond precision with a `Z` suffix keeps julianday() happy.
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("bad timestamp {raw:?}: {e}")))
}

fn session_id(conn: &Connection, slug: &str) -> Result<i64> {
    conn.query_row("SELECT id FROM sessions WHERE slug = ?1", [slug], |row| {
        row.get(0)
    })
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| Error::SessionMissing(slug.to_owned()))
}

fn append_entries(
    tx: &Transaction<'_>,
    sid: i64,
    kind: &str,
    lines: &[String],
) -> Result<u64> {
    for line in lines {
        tx.execute(
            r#"
            INSERT INTO text_entries (session_id, kind, position, content)
            VALUES (
                ?1, ?2,
                (SELECT COALESCE(MAX(position), 0) + 1
                   FROM text_entries WHERE session_id = ?1 AND kind = ?2),
                ?3
            )
            "#,
            params![sid, kind, line],
        )
        .map_err(db_err)?;
    }
    entry_count(tx, sid, kind)
}

fn entry_count(conn: &Connection, sid: i64, kind: &str) -> Result<u64> {
    let count: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(position), 0) FROM text_entries \
             WHERE session_id = ?1 AND kind = ?2",
            params![sid, kind],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(count as u64)
}

fn write_state(tx: &Transaction<'_>, sid: i64, state: &SessionState) -> Result<()> {
    let now = ts(Utc::now());
    tx.execute(
        r#"
        INSERT INTO session_state (session_id, state_json, turn_number, log_index, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(session_id) DO UPDATE SET
            state_json = excluded.state_json,
            turn_number = excluded.turn_number,
            log_index = excluded.log_index,
            updated_at = excluded.updated_at
        "#,
        params![
            sid,
            serde_json::to_string(state)?,
            state.turn as i64,
            state.log_index as i64,
            now
        ],
    )
    .map_err(db_err)?;
    tx.execute(
        "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
        params![sid, now],
    )
    .map_err(db_err)?;
    Ok(())
}

fn load_log(
    conn: &Connection,
    sid: i64,
    kind: &str,
    tail: Option<usize>,
    cursor: Option<u64>,
) -> Result<LogPage> {
    let mut stmt = conn
        .prepare(
            "SELECT content FROM text_entries \
             WHERE session_id = ?1 AND kind = ?2 ORDER BY position",
        )
        .map_err(db_err)?;
    let lines = stmt
        .query_map(params![sid, kind], |row| row.get::<_, String>(0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(page_log(lines, tail, cursor))
}

impl Storage for SqliteStorage {
    // ── Session lifecycle ─────────────────────────────────────────

    fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT s.slug, s.world, s.updated_at, l.owner, l.ttl_seconds, l.acquired_at \
                 FROM sessions s LEFT JOIN locks l ON l.session_id = s.id \
                 ORDER BY s.updated_at DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let now = Utc::now();
        let mut summaries = Vec::with_capacity(rows.len());
        for (slug, world, updated_at, owner, ttl, acquired_at) in rows {
            let has_lock = match (owner, ttl, acquired_at) {
                (Some(owner), Some(ttl), Some(acquired_at)) => !LockState {
                    owner,
                    ttl_secs: ttl as u64,
                    acquired_at: parse_ts(&acquired_at)?,
                }
                .is_expired(now),
                _ => false,
            };
            summaries.push(SessionSummary {
                slug,
                world,
                has_lock,
                updated_at: parse_ts(&updated_at)?,
            });
        }
        Ok(summaries)
    }

    fn session_exists(&self, slug: &str) -> Result<bool> {
        let conn = self.conn.lock();
        Ok(session_id(&conn, slug).is_ok())
    }

    fn create_session(
        &self,
        meta: &SessionMeta,
        state: &SessionState,
        character: Option<&CharacterRecord>,
        init_line: &str,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO sessions (slug, world, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![meta.slug, meta.world, ts(meta.created_at), ts(meta.updated_at)],
            )
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(Error::Conflict(format!("session {} exists", meta.slug)));
        }
        let sid = tx.last_insert_rowid();

        write_state(&tx, sid, state)?;
        if let Some(character) = character {
            upsert_character(&tx, sid, character)?;
        }
        append_entries(&tx, sid, "changelog", &sanitize_lines(&[init_line.to_owned()]))?;

        tx.commit().map_err(db_err)
    }

    fn load_meta(&self, slug: &str) -> Result<SessionMeta> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let (world, created_at, updated_at) = conn
            .query_row(
                "SELECT world, created_at, updated_at FROM sessions WHERE id = ?1",
                [sid],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(db_err)?;
        Ok(SessionMeta {
            slug: slug.to_owned(),
            world,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn load_state(&self, slug: &str) -> Result<SessionState> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let raw: String = conn
            .query_row(
                "SELECT state_json FROM session_state WHERE session_id = ?1",
                [sid],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save_state(&self, slug: &str, state: &SessionState) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let sid = session_id(&tx, slug)?;
        write_state(&tx, sid, state)?;
        tx.commit().map_err(db_err)
    }

    // ── Append-only logs ──────────────────────────────────────────

    fn append_transcript(&self, slug: &str, lines: &[String]) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let sid = session_id(&tx, slug)?;
        let count = append_entries(&tx, sid, "transcript", &sanitize_lines(lines))?;
        tx.commit().map_err(db_err)?;
        Ok(count)
    }

    fn append_changelog(&self, slug: &str, lines: &[String]) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let sid = session_id(&tx, slug)?;
        let count = append_entries(&tx, sid, "changelog", &sanitize_lines(lines))?;
        tx.commit().map_err(db_err)?;
        Ok(count)
    }

    fn load_transcript(
        &self,
        slug: &str,
        tail: Option<usize>,
        cursor: Option<u64>,
    ) -> Result<LogPage> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        load_log(&conn, sid, "transcript", tail, cursor)
    }

    fn load_changelog(
        &self,
        slug: &str,
        tail: Option<usize>,
        cursor: Option<u64>,
    ) -> Result<LogPage> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        load_log(&conn, sid, "changelog", tail, cursor)
    }

    fn transcript_len(&self, slug: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        entry_count(&conn, sid, "transcript")
    }

    fn changelog_len(&self, slug: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        entry_count(&conn, sid, "changelog")
    }

    // ── Turn records ──────────────────────────────────────────────

    fn persist_turn_record(&self, slug: &str, record: &TurnRecord) -> Result<()> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO turns (session_id, turn_number, turn_record_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    sid,
                    record.turn as i64,
                    serde_json::to_string(record)?,
                    ts(record.created_at)
                ],
            )
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "turn record {} already exists for {slug}",
                record.turn
            )));
        }
        Ok(())
    }

    fn load_turn_records(&self, slug: &str, limit: usize) -> Result<Vec<TurnRecord>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let mut stmt = conn
            .prepare(
                "SELECT turn_record_json FROM turns WHERE session_id = ?1 \
                 ORDER BY turn_number DESC LIMIT ?2",
            )
            .map_err(db_err)?;
        let raws = stmt
            .query_map(params![sid, limit as i64], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        raws.iter()
            .map(|raw| serde_json::from_str(raw).map_err(Into::into))
            .collect()
    }

    fn load_turn_record(&self, slug: &str, turn: u64) -> Result<Option<TurnRecord>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT turn_record_json FROM turns WHERE session_id = ?1 AND turn_number = ?2",
                params![sid, turn as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn append_rolls_to_turn(&self, slug: &str, turn: u64, rolls: &[RollResult]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let sid = session_id(&tx, slug)?;
        let raw: Option<String> = tx
            .query_row(
                "SELECT turn_record_json FROM turns WHERE session_id = ?1 AND turn_number = ?2",
                params![sid, turn as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(raw) = raw else {
            return Err(Error::Conflict(format!("no turn record {turn} for {slug}")));
        };
        let mut record: TurnRecord = serde_json::from_str(&raw)?;
        record.rolls.extend(rolls.iter().cloned());
        tx.execute(
            "UPDATE turns SET turn_record_json = ?3 \
             WHERE session_id = ?1 AND turn_number = ?2",
            params![sid, turn as i64, serde_json::to_string(&record)?],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    // ── Previews ──────────────────────────────────────────────────

    fn save_preview(&self, slug: &str, preview: &Preview) -> Result<()> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        conn.execute(
            r#"
            INSERT INTO previews (session_id, preview_id, payload_json, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(session_id, preview_id) DO UPDATE SET
                payload_json = excluded.payload_json
            "#,
            params![
                sid,
                preview.id,
                serde_json::to_string(preview)?,
                ts(preview.created_at)
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn load_preview(&self, slug: &str, id: &str) -> Result<Option<Preview>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM previews WHERE session_id = ?1 AND preview_id = ?2",
                params![sid, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn delete_preview(&self, slug: &str, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        conn.execute(
            "DELETE FROM previews WHERE session_id = ?1 AND preview_id = ?2",
            params![sid, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn list_previews(&self, slug: &str) -> Result<Vec<Preview>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let mut stmt = conn
            .prepare(
                "SELECT payload_json FROM previews WHERE session_id = ?1 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let raws = stmt
            .query_map([sid], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        raws.iter()
            .map(|raw| serde_json::from_str(raw).map_err(Into::into))
            .collect()
    }

    // ── Locks ─────────────────────────────────────────────────────

    fn claim_lock(&self, slug: &str, owner: &str, ttl_secs: u64) -> Result<LockState> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let lease = LockState {
            owner: owner.to_owned(),
            ttl_secs,
            acquired_at: Utc::now(),
        };

        // One conditional upsert: insert when free; update when the
        // claimant already owns the lease or the lease has expired.
        let applied = conn
            .execute(
                r#"
                INSERT INTO locks (session_id, owner, ttl_seconds, acquired_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(session_id) DO UPDATE SET
                    owner = excluded.owner,
                    ttl_seconds = excluded.ttl_seconds,
                    acquired_at = excluded.acquired_at
                WHERE locks.owner = excluded.owner
                   OR julianday(locks.acquired_at) + (locks.ttl_seconds * 1.0) / 86400.0
                      < julianday(excluded.acquired_at)
                "#,
                params![sid, lease.owner, lease.ttl_secs as i64, ts(lease.acquired_at)],
            )
            .map_err(db_err)?;

        if applied == 0 {
            let holder: String = conn
                .query_row(
                    "SELECT owner FROM locks WHERE session_id = ?1",
                    [sid],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            return Err(Error::LockHeld { owner: holder });
        }
        Ok(lease)
    }

    fn release_lock(&self, slug: &str, owner: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        if let Some(owner) = owner {
            let holder: Option<String> = conn
                .query_row(
                    "SELECT owner FROM locks WHERE session_id = ?1",
                    [sid],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            match holder {
                None => return Ok(()),
                Some(holder) if holder != owner => return Err(Error::LockOwnerMismatch),
                Some(_) => {}
            }
        }
        conn.execute("DELETE FROM locks WHERE session_id = ?1", [sid])
            .map_err(db_err)?;
        Ok(())
    }

    fn get_lock(&self, slug: &str) -> Result<Option<LockState>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let row: Option<(String, i64, String)> = conn
            .query_row(
                "SELECT owner, ttl_seconds, acquired_at FROM locks WHERE session_id = ?1",
                [sid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;
        match row {
            Some((owner, ttl, acquired_at)) => Ok(Some(LockState {
                owner,
                ttl_secs: ttl as u64,
                acquired_at: parse_ts(&acquired_at)?,
            })),
            None => Ok(None),
        }
    }

    // ── Atomic turn commit ────────────────────────────────────────

    fn commit_turn(&self, slug: &str, write: &CommitWrite) -> Result<CommitReceipt> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let sid = session_id(&tx, slug)?;

        write_state(&tx, sid, &write.state)?;
        let transcript_len =
            append_entries(&tx, sid, "transcript", &sanitize_lines(&write.transcript_lines))?;
        let changelog_len =
            append_entries(&tx, sid, "changelog", &sanitize_lines(&write.changelog_lines))?;

        if let Some(record) = &write.turn_record {
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO turns \
                     (session_id, turn_number, turn_record_json, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        sid,
                        record.turn as i64,
                        serde_json::to_string(record)?,
                        ts(record.created_at)
                    ],
                )
                .map_err(db_err)?;
            if inserted == 0 {
                // Dropping the transaction rolls every step back.
                return Err(Error::Conflict(format!(
                    "turn record {} already exists for {slug}",
                    record.turn
                )));
            }
        }

        if let Some(id) = &write.delete_preview_id {
            tx.execute(
                "DELETE FROM previews WHERE session_id = ?1 AND preview_id = ?2",
                params![sid, id],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(CommitReceipt {
            transcript_len,
            changelog_len,
        })
    }

    // ── Snapshots ─────────────────────────────────────────────────

    fn create_snapshot(&self, slug: &str, snapshot: &Snapshot) -> Result<()> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let save_type = match snapshot.save_type {
            tf_domain::model::SaveType::Auto => "auto",
            tf_domain::model::SaveType::Manual => "manual",
        };
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO snapshots \
                 (session_id, save_id, save_type, snapshot_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    sid,
                    snapshot.save_id,
                    save_type,
                    serde_json::to_string(snapshot)?,
                    ts(snapshot.created_at)
                ],
            )
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(Error::Conflict(format!(
                "save {} already exists",
                snapshot.save_id
            )));
        }
        Ok(())
    }

    fn list_snapshots(&self, slug: &str, limit: usize) -> Result<Vec<SnapshotSummary>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let mut stmt = conn
            .prepare(
                "SELECT snapshot_json FROM snapshots WHERE session_id = ?1 \
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(db_err)?;
        let raws = stmt
            .query_map(params![sid, limit as i64], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        raws.iter()
            .map(|raw| {
                let snapshot: Snapshot = serde_json::from_str(raw)?;
                Ok(SnapshotSummary {
                    save_id: snapshot.save_id,
                    save_type: snapshot.save_type,
                    created_at: snapshot.created_at,
                    turn: snapshot.state.turn,
                })
            })
            .collect()
    }

    fn load_snapshot(&self, slug: &str, save_id: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT snapshot_json FROM snapshots WHERE session_id = ?1 AND save_id = ?2",
                params![sid, save_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // ── Characters ────────────────────────────────────────────────

    fn load_character(&self, slug: &str) -> Result<Option<CharacterRecord>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT character_json FROM characters WHERE session_id = ?1 \
                 ORDER BY updated_at DESC LIMIT 1",
                [sid],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save_character(
        &self,
        slug: &str,
        character: &CharacterRecord,
        persist_shared: bool,
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let sid = session_id(&tx, slug)?;
        upsert_character(&tx, sid, character)?;
        if persist_shared {
            upsert_character(&tx, SHARED_SESSION_ID, character)?;
        }
        tx.commit().map_err(db_err)
    }

    fn load_shared_character(&self, character_slug: &str) -> Result<Option<CharacterRecord>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT character_json FROM characters \
                 WHERE session_id = ?1 AND slug = ?2",
                params![SHARED_SESSION_ID, character_slug],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    // ── Auxiliary documents ───────────────────────────────────────

    fn load_doc(&self, slug: &str, kind: DocKind) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM session_docs WHERE session_id = ?1 AND kind = ?2",
                params![sid, kind.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save_doc(&self, slug: &str, kind: DocKind, payload: &Value) -> Result<()> {
        let conn = self.conn.lock();
        let sid = session_id(&conn, slug)?;
        conn.execute(
            r#"
            INSERT INTO session_docs (session_id, kind, payload_json)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(session_id, kind) DO UPDATE SET
                payload_json = excluded.payload_json
            "#,
            params![sid, kind.as_str(), serde_json::to_string(payload)?],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ── Entropy stream ────────────────────────────────────────────

    fn entropy_len(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let len: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(entropy_index), 0) FROM entropy",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(len as u64)
    }

    fn load_entropy(&self, index: u64) -> Result<Option<EntropyEntry>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT entropy_json FROM entropy WHERE entropy_index = ?1",
                [index as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn peek_entropy(&self, limit: usize) -> Result<Vec<EntropyEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT entropy_json FROM entropy ORDER BY entropy_index LIMIT ?1")
            .map_err(db_err)?;
        let raws = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        raws.iter()
            .map(|raw| serde_json::from_str(raw).map_err(Into::into))
            .collect()
    }

    fn append_entropy(&self, entries: &[EntropyEntry]) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let len: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(entropy_index), 0) FROM entropy",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if let Some(first) = entries.first() {
            if first.index != len as u64 + 1 {
                return Err(Error::Conflict(format!(
                    "entropy append must continue at {}, got {}",
                    len + 1,
                    first.index
                )));
            }
        }
        for entry in entries {
            tx.execute(
                "INSERT INTO entropy (entropy_index, entropy_json) VALUES (?1, ?2)",
                params![entry.index as i64, serde_json::to_string(entry)?],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(len as u64 + entries.len() as u64)
    }
}

fn upsert_character(tx: &Transaction<'_>, sid: i64, character: &CharacterRecord) -> Result<()> {
    let now = ts(Utc::now());
    tx.execute(
        r#"
        INSERT INTO characters
            (session_id, slug, character_json, is_shared, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        ON CONFLICT(session_id, slug) DO UPDATE SET
            character_json = excluded.character_json,
            updated_at = excluded.updated_at
        "#,
        params![
            sid,
            character.slug,
            serde_json::to_string(character)?,
            (sid == SHARED_SESSION_ID) as i64,
            now
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
