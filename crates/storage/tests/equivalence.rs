//! Backend equivalence: the filesystem and sqlite implementations must
//! be observationally identical for the same operation sequence.
//! Structured read-backs match, and log entry counts and cursors match
//! even though one stores lines in files and the other stores rows.

use chrono::Utc;
use serde_json::json;

use tf_domain::model::{
    CharacterRecord, DocKind, EntropyEntry, SaveType, SessionMeta, SessionState, Snapshot,
    TurnRecord,
};
use tf_storage::{CommitWrite, FsStorage, SqliteStorage, Storage};

fn backends() -> (tempfile::TempDir, Vec<Box<dyn Storage>>) {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsStorage::open(dir.path()).unwrap();
    let sqlite = SqliteStorage::open_in_memory().unwrap();
    (dir, vec![Box::new(fs), Box::new(sqlite)])
}

fn seed(storage: &dyn Storage, slug: &str) {
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
            Some(&CharacterRecord {
                slug: "brina".into(),
                name: "Brina".into(),
                sheet: json!({"class": "ranger", "level": 3}),
                updated_at: now,
            }),
            r#"{"event":"session_created","slug":"alpha"}"#,
        )
        .unwrap();
}

#[test]
fn log_counts_and_cursors_match() {
    let (_dir, backends) = backends();

    let mut observed = Vec::new();
    for storage in &backends {
        seed(storage.as_ref(), "alpha");

        // Blank and multi-line entries exercise the line discipline.
        storage
            .append_transcript(
                "alpha",
                &[
                    "You wake in the reeds.".into(),
                    "".into(),
                    "A heron\nwatches you.".into(),
                ],
            )
            .unwrap();
        storage
            .append_changelog("alpha", &[r#"{"turn":1}"#.into(), r#"{"turn":2}"#.into()])
            .unwrap();

        let transcript = storage.load_transcript("alpha", None, None).unwrap();
        let changelog = storage.load_changelog("alpha", None, None).unwrap();
        let tail = storage.load_transcript("alpha", Some(1), None).unwrap();
        let after = storage.load_transcript("alpha", None, Some(1)).unwrap();

        observed.push((
            transcript.cursor,
            transcript
                .items
                .iter()
                .map(|i| (i.id, i.text.clone()))
                .collect::<Vec<_>>(),
            changelog.cursor,
            tail.items.iter().map(|i| i.id).collect::<Vec<_>>(),
            after.items.iter().map(|i| i.id).collect::<Vec<_>>(),
        ));
    }

    assert_eq!(observed[0], observed[1]);
    assert_eq!(observed[0].0, 2, "blank line must not count");
    assert_eq!(observed[0].1[1].1, "A heron watches you.");
}

#[test]
fn state_roundtrip_matches_byte_for_byte() {
    let (_dir, backends) = backends();

    let mut serialized = Vec::new();
    for storage in &backends {
        seed(storage.as_ref(), "alpha");
        let mut state = storage.load_state("alpha").unwrap();
        state.location = "fen-road".into();
        state.flags.insert("heron_seen".into(), json!(true));
        state
            .extra
            .insert("weather".into(), json!({"sky": "overcast"}));
        storage.save_state("alpha", &state).unwrap();

        let loaded = storage.load_state("alpha").unwrap();
        serialized.push(serde_json::to_string(&loaded).unwrap());
    }
    assert_eq!(serialized[0], serialized[1]);
}

#[test]
fn commit_receipts_match() {
    let (_dir, backends) = backends();

    let mut receipts = Vec::new();
    for storage in &backends {
        seed(storage.as_ref(), "alpha");
        let mut state = storage.load_state("alpha").unwrap();
        state.turn = 1;
        state.location = "camp".into();

        let receipt = storage
            .commit_turn(
                "alpha",
                &CommitWrite {
                    state,
                    transcript_lines: vec!["look".into()],
                    changelog_lines: vec![r#"{"turn":1,"entropy_indices":[]}"#.into()],
                    turn_record: Some(TurnRecord {
                        turn: 1,
                        player_intent: "look".into(),
                        diff: vec![],
                        consequence_echo: String::new(),
                        dm: Default::default(),
                        created_at: Utc::now(),
                        rolls: vec![],
                    }),
                    delete_preview_id: None,
                },
            )
            .unwrap();
        receipts.push((receipt.transcript_len, receipt.changelog_len));

        assert_eq!(storage.load_state("alpha").unwrap().turn, 1);
        assert!(storage.load_turn_record("alpha", 1).unwrap().is_some());
    }
    assert_eq!(receipts[0], (1, 2));
    assert_eq!(receipts[0], receipts[1]);
}

#[test]
fn snapshots_docs_characters_match() {
    let (_dir, backends) = backends();

    for storage in &backends {
        seed(storage.as_ref(), "alpha");

        storage
            .create_snapshot(
                "alpha",
                &Snapshot {
                    save_id: "save-one".into(),
                    save_type: SaveType::Manual,
                    created_at: Utc::now(),
                    state: storage.load_state("alpha").unwrap(),
                    character: storage.load_character("alpha").unwrap(),
                },
            )
            .unwrap();
        let listed = storage.list_snapshots("alpha", 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].save_id, "save-one");
        assert!(storage
            .load_snapshot("alpha", "save-one")
            .unwrap()
            .is_some());
        assert!(storage.load_snapshot("alpha", "other").unwrap().is_none());

        let mood = json!({"tone": "uneasy", "tension": 3});
        storage.save_doc("alpha", DocKind::Mood, &mood).unwrap();
        assert_eq!(storage.load_doc("alpha", DocKind::Mood).unwrap(), Some(mood));
        assert_eq!(storage.load_doc("alpha", DocKind::Discoveries).unwrap(), None);

        let character = storage.load_character("alpha").unwrap().unwrap();
        assert_eq!(character.slug, "brina");
        storage.save_character("alpha", &character, true).unwrap();
        assert_eq!(
            storage
                .load_shared_character("brina")
                .unwrap()
                .unwrap()
                .name,
            "Brina"
        );
    }
}

#[test]
fn entropy_stream_matches() {
    let (_dir, backends) = backends();

    for storage in &backends {
        let entries: Vec<EntropyEntry> = (1..=5)
            .map(|index| EntropyEntry {
                index,
                d20: vec![(index % 20) as u8 + 1; 8],
                d100: vec![(index % 100) as u8 + 1; 4],
                raw: Some(vec![index as u8; 4]),
            })
            .collect();
        assert_eq!(storage.append_entropy(&entries).unwrap(), 5);
        assert_eq!(storage.entropy_len().unwrap(), 5);

        let peeked = storage.peek_entropy(3).unwrap();
        assert_eq!(
            peeked.iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(storage.load_entropy(4).unwrap().unwrap().d20[0], 5);
        assert!(storage.load_entropy(6).unwrap().is_none());
    }
}

#[test]
fn lock_protocol_matches() {
    let (_dir, backends) = backends();

    for storage in &backends {
        seed(storage.as_ref(), "alpha");

        let lease = storage.claim_lock("alpha", "alice", 60).unwrap();
        assert_eq!(lease.owner, "alice");
        assert!(matches!(
            storage.claim_lock("alpha", "bob", 60).unwrap_err(),
            tf_domain::Error::LockHeld { ref owner } if owner == "alice"
        ));
        // Same-owner refresh keeps the lease.
        storage.claim_lock("alpha", "alice", 90).unwrap();
        assert_eq!(storage.get_lock("alpha").unwrap().unwrap().ttl_secs, 90);
        storage.release_lock("alpha", Some("alice")).unwrap();
        assert!(storage.get_lock("alpha").unwrap().is_none());
    }
}
