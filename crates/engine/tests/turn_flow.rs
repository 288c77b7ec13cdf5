//! End-to-end turn protocol tests, run against both storage backends.

use std::sync::Arc;

use serde_json::json;

use tf_domain::model::{DmTurn, SaveType};
use tf_domain::Error;
use tf_engine::{Engine, EngineSettings, NarrateRequest, PreviewRequest};
use tf_storage::{FsStorage, SqliteStorage, Storage};

fn settings() -> EngineSettings {
    EngineSettings {
        default_template: "template-classic".into(),
        default_lock_ttl_secs: 120,
        preview_ttl_secs: 3600,
        preview_keep_max: 32,
        autosave_every_turns: 0,
        entropy_seed: 99,
        entropy_low_water: 0,
    }
}

/// Both backends behind the same engine surface.
fn engines() -> (tempfile::TempDir, Vec<Engine>) {
    let dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn Storage> = Arc::new(FsStorage::open(dir.path()).unwrap());
    let sqlite: Arc<dyn Storage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let engines = vec![
        Engine::new(fs, settings()),
        Engine::new(sqlite, settings()),
    ];
    for engine in &engines {
        engine.entropy().extend(99, 64).unwrap();
        engine.create_session("quest", None, None).unwrap();
        engine.locks().claim("quest", "dm", 120).unwrap();
    }
    (dir, engines)
}

fn preview_request(patch: serde_json::Value, dice: &[&str]) -> PreviewRequest {
    PreviewRequest {
        response: "The fire crackles.".into(),
        state_patch: patch,
        transcript_entry: Some("look".into()),
        changelog_entry: None,
        dice_expressions: dice.iter().map(|s| s.to_string()).collect(),
        lock_owner: Some("dm".into()),
    }
}

#[test]
fn empty_preview_then_commit() {
    let (_dir, engines) = engines();
    for engine in &engines {
        // S1: preview is a pure reservation.
        let outcome = engine
            .preview("quest", preview_request(json!({"location": "camp"}), &[]))
            .unwrap();
        assert!(outcome
            .diffs
            .iter()
            .any(|d| d.path == "location" && d.changes == "→camp"));
        assert!(outcome.entropy_plan.indices.is_empty());
        assert_eq!(outcome.entropy_plan.usage, "0 rolls");

        let state = engine.storage().load_state("quest").unwrap();
        assert_eq!(state.turn, 0);
        assert_eq!(engine.storage().transcript_len("quest").unwrap(), 0);

        // S2: commit applies it.
        let committed = engine.commit("quest", &outcome.id, Some("dm")).unwrap();
        assert_eq!(committed.state.turn, 1);
        assert_eq!(committed.state.location, "camp");
        assert_eq!(committed.state.log_index, 0);
        assert_eq!(committed.log_indices.transcript_len, 1);

        // The preview is consumed.
        assert!(matches!(
            engine.commit("quest", &outcome.id, Some("dm")),
            Err(Error::PreviewMissing(_))
        ));
    }
}

#[test]
fn reservation_advances_cursor() {
    let (_dir, engines) = engines();
    for engine in &engines {
        // S3: two expressions reserve [1, 2].
        let outcome = engine
            .preview("quest", preview_request(json!({}), &["1d20", "2d6"]))
            .unwrap();
        assert_eq!(outcome.entropy_plan.indices, vec![1, 2]);

        let committed = engine.commit("quest", &outcome.id, Some("dm")).unwrap();
        assert_eq!(committed.state.log_index, 2);
        assert_eq!(committed.rolls.len(), 2);
        assert_eq!(committed.rolls[0].consumed_indices, vec![1]);
        assert_eq!(committed.rolls[1].consumed_indices, vec![2]);
        // Transcript holds the entry plus one breakdown per roll.
        assert_eq!(committed.log_indices.transcript_len, 3);

        // The next reservation starts past the consumed range.
        let next = engine
            .preview("quest", preview_request(json!({}), &["1d4"]))
            .unwrap();
        assert_eq!(next.entropy_plan.indices, vec![3]);
    }
}

#[test]
fn intervening_roll_stales_preview() {
    let (_dir, engines) = engines();
    for engine in &engines {
        // S4: the roll consumes index 1 and bumps the cursor, which
        // lives in the hashed state.
        let parked = engine
            .preview("quest", preview_request(json!({}), &["1d20"]))
            .unwrap();

        let roll = engine
            .roll("quest", "1d20", Some("Perception check"), Some("dm"))
            .unwrap();
        assert_eq!(roll.result.consumed_indices, vec![1]);
        assert!(roll.phrase.starts_with("Perception check:"));

        let err = engine.commit("quest", &parked.id, Some("dm")).unwrap_err();
        assert!(matches!(err, Error::PreviewStale(_)));

        // Recovery: a fresh preview reserves past the roll.
        let fresh = engine
            .preview("quest", preview_request(json!({}), &["1d20"]))
            .unwrap();
        assert_eq!(fresh.entropy_plan.indices, vec![2]);
        engine.commit("quest", &fresh.id, Some("dm")).unwrap();
    }
}

#[test]
fn concurrent_previews_one_winner() {
    let (_dir, engines) = engines();
    for engine in &engines {
        let first = engine
            .preview("quest", preview_request(json!({"location": "ford"}), &[]))
            .unwrap();
        let second = engine
            .preview("quest", preview_request(json!({"location": "ridge"}), &[]))
            .unwrap();

        engine.commit("quest", &second.id, Some("dm")).unwrap();
        assert!(matches!(
            engine.commit("quest", &first.id, Some("dm")),
            Err(Error::PreviewStale(_))
        ));
        assert_eq!(
            engine.storage().load_state("quest").unwrap().location,
            "ridge"
        );
    }
}

#[test]
fn turn_and_cursor_invariants_over_a_run() {
    let (_dir, engines) = engines();
    for engine in &engines {
        let mut consumed = Vec::new();
        for round in 1..=5u64 {
            let dice: Vec<&str> = if round % 2 == 0 { vec!["1d20"] } else { vec![] };
            let outcome = engine
                .preview("quest", preview_request(json!({"gold": round}), &dice))
                .unwrap();
            let committed = engine
                .commit_and_narrate(
                    "quest",
                    &outcome.id,
                    Some("dm"),
                    NarrateRequest {
                        player_intent: format!("round {round}"),
                        consequence_echo: String::new(),
                        dm: DmTurn {
                            narration: "Onward.".into(),
                            ..Default::default()
                        },
                    },
                )
                .unwrap();

            // Turn increments by exactly 1 per commit.
            assert_eq!(committed.state.turn, round);
            for roll in &committed.rolls {
                consumed.extend(roll.consumed_indices.iter().copied());
            }
        }

        // One record per committed turn.
        let records = engine.storage().load_turn_records("quest", 100).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].turn, 5);

        // No entropy index consumed twice; cursor equals the maximum.
        let mut unique = consumed.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), consumed.len());
        let state = engine.storage().load_state("quest").unwrap();
        assert_eq!(state.log_index, consumed.iter().copied().max().unwrap_or(0));
    }
}

#[test]
fn concurrent_claims_elect_one_owner() {
    let (_dir, engines) = engines();
    for engine in engines {
        // S5: burst of distinct owners on an unlocked session.
        engine.locks().release("quest", None).unwrap();
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    engine.locks().claim("quest", &format!("player-{i}"), 60)
                })
            })
            .collect();

        let mut winners = 0;
        let mut held_errors = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(_) => winners += 1,
                Err(Error::LockHeld { .. }) => held_errors += 1,
                Err(other) => panic!("unexpected claim error: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(held_errors, 5);
    }
}

#[test]
fn failed_commit_leaves_no_partial_state() {
    let (_dir, engines) = engines();
    for engine in &engines {
        // S6: plant a conflicting turn record so the commit's write set
        // fails mid-flight; every artifact must come back untouched.
        engine
            .storage()
            .persist_turn_record(
                "quest",
                &tf_domain::model::TurnRecord {
                    turn: 1,
                    player_intent: "planted".into(),
                    diff: vec![],
                    consequence_echo: String::new(),
                    dm: DmTurn::default(),
                    created_at: chrono::Utc::now(),
                    rolls: vec![],
                },
            )
            .unwrap();

        let transcript_before = engine.storage().transcript_len("quest").unwrap();
        let changelog_before = engine.storage().changelog_len("quest").unwrap();

        let outcome = engine
            .preview("quest", preview_request(json!({"location": "mire"}), &["1d6"]))
            .unwrap();
        let err = engine
            .commit_and_narrate(
                "quest",
                &outcome.id,
                Some("dm"),
                NarrateRequest {
                    player_intent: "walk".into(),
                    consequence_echo: String::new(),
                    dm: DmTurn::default(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), "Conflict");

        let state = engine.storage().load_state("quest").unwrap();
        assert_eq!(state.turn, 0, "turn must not advance");
        assert_eq!(state.location, "", "state must not change");
        assert_eq!(
            engine.storage().transcript_len("quest").unwrap(),
            transcript_before
        );
        assert_eq!(
            engine.storage().changelog_len("quest").unwrap(),
            changelog_before
        );
    }
}

#[test]
fn narrated_commit_persists_record_and_discovery() {
    let (_dir, engines) = engines();
    for engine in &engines {
        let outcome = engine
            .preview("quest", preview_request(json!({}), &["1d20"]))
            .unwrap();
        let committed = engine
            .commit_and_narrate(
                "quest",
                &outcome.id,
                Some("dm"),
                NarrateRequest {
                    player_intent: "search the cairn".into(),
                    consequence_echo: "loose stones shift".into(),
                    dm: DmTurn {
                        narration: "Beneath the stones, a bronze key.".into(),
                        recap: "You searched the cairn.".into(),
                        stakes: "Something heard you.".into(),
                        choices: vec!["take the key".into(), "leave".into()],
                        roll_request: None,
                        discovery_added: Some(json!({"title": "bronze key"})),
                    },
                },
            )
            .unwrap();

        let record = engine
            .storage()
            .load_turn_record("quest", committed.state.turn)
            .unwrap()
            .unwrap();
        assert_eq!(record.player_intent, "search the cairn");
        assert_eq!(record.rolls.len(), 1);

        let discoveries = engine
            .storage()
            .load_doc("quest", tf_domain::model::DocKind::Discoveries)
            .unwrap()
            .unwrap();
        assert_eq!(discoveries["items"].as_array().unwrap().len(), 1);

        let last = engine
            .storage()
            .load_doc("quest", tf_domain::model::DocKind::LastDiscovery)
            .unwrap()
            .unwrap();
        assert_eq!(last["turn"], json!(committed.state.turn));
    }
}

#[test]
fn roll_appends_to_existing_turn_record() {
    let (_dir, engines) = engines();
    for engine in &engines {
        let outcome = engine
            .preview("quest", preview_request(json!({}), &[]))
            .unwrap();
        engine
            .commit_and_narrate(
                "quest",
                &outcome.id,
                Some("dm"),
                NarrateRequest {
                    player_intent: "camp".into(),
                    consequence_echo: String::new(),
                    dm: DmTurn::default(),
                },
            )
            .unwrap();

        engine.roll("quest", "1d20+1", None, Some("dm")).unwrap();

        let record = engine.storage().load_turn_record("quest", 1).unwrap().unwrap();
        assert_eq!(record.rolls.len(), 1);
        assert_eq!(record.rolls[0].expression, "1d20+1");
    }
}

#[test]
fn preview_rejections() {
    let (_dir, engines) = engines();
    for engine in &engines {
        // Protected fields cannot be patched directly.
        let err = engine
            .preview("quest", preview_request(json!({"turn": 7}), &[]))
            .unwrap_err();
        assert_eq!(err.kind(), "SchemaViolation");

        // Type violations in the merged document are rejected.
        let err = engine
            .preview("quest", preview_request(json!({"hp": "lots"}), &[]))
            .unwrap_err();
        assert_eq!(err.kind(), "SchemaViolation");

        // Malformed dice expressions are rejected before reservation.
        let err = engine
            .preview("quest", preview_request(json!({}), &["1d"]))
            .unwrap_err();
        assert_eq!(err.kind(), "ExpressionInvalid");

        // Nothing above may have touched the session.
        assert_eq!(engine.storage().load_state("quest").unwrap().turn, 0);
    }
}

#[test]
fn lock_discipline_enforced() {
    let (_dir, engines) = engines();
    for engine in &engines {
        // Wrong owner is as good as no lock.
        let mut request = preview_request(json!({}), &[]);
        request.lock_owner = Some("impostor".into());
        assert!(matches!(
            engine.preview("quest", request),
            Err(Error::LockRequired(_))
        ));

        assert!(matches!(
            engine.roll("quest", "1d20", None, Some("impostor")),
            Err(Error::LockRequired(_))
        ));

        // Released lock blocks everything, including commits.
        let outcome = engine
            .preview("quest", preview_request(json!({}), &[]))
            .unwrap();
        engine.locks().release("quest", Some("dm")).unwrap();
        assert!(matches!(
            engine.commit("quest", &outcome.id, Some("dm")),
            Err(Error::LockRequired(_))
        ));
        engine.locks().claim("quest", "dm", 120).unwrap();
    }
}

#[test]
fn entropy_exhaustion_blocks_preview() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(dir.path()).unwrap());
    let engine = Engine::new(storage, settings());
    engine.entropy().extend(99, 1).unwrap();
    engine.create_session("quest", None, None).unwrap();
    engine.locks().claim("quest", "dm", 120).unwrap();

    let err = engine
        .preview("quest", preview_request(json!({}), &["1d20", "1d20"]))
        .unwrap_err();
    assert!(matches!(err, Error::EntropyExhausted(2)));

    // One die fits the remaining stream.
    engine
        .preview("quest", preview_request(json!({}), &["1d20"]))
        .unwrap();
}

#[test]
fn preview_gc_caps_parked_previews() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(dir.path()).unwrap());
    let mut config = settings();
    config.preview_keep_max = 2;
    let engine = Engine::new(storage, config);
    engine.entropy().extend(99, 8).unwrap();
    engine.create_session("quest", None, None).unwrap();
    engine.locks().claim("quest", "dm", 120).unwrap();

    for _ in 0..4 {
        engine
            .preview("quest", preview_request(json!({}), &[]))
            .unwrap();
    }
    let parked = engine.storage().list_previews("quest").unwrap();
    // GC runs before each save, so at most keep_max + the newest.
    assert!(parked.len() <= 3, "got {} parked previews", parked.len());
}

#[test]
fn autosave_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let storage: Arc<dyn Storage> = Arc::new(FsStorage::open(dir.path()).unwrap());
    let mut config = settings();
    config.autosave_every_turns = 2;
    let engine = Engine::new(storage, config);
    engine.entropy().extend(99, 8).unwrap();
    engine.create_session("quest", None, None).unwrap();
    engine.locks().claim("quest", "dm", 120).unwrap();

    for _ in 0..2 {
        let outcome = engine
            .preview("quest", preview_request(json!({}), &[]))
            .unwrap();
        engine.commit("quest", &outcome.id, Some("dm")).unwrap();
    }

    let saves = engine.list_snapshots("quest", 10).unwrap();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].save_type, SaveType::Auto);
    assert_eq!(saves[0].turn, 2);
    assert!(engine
        .storage()
        .load_doc("quest", tf_domain::model::DocKind::AutosaveMeta)
        .unwrap()
        .is_some());
}

#[test]
fn manual_snapshot_and_restore() {
    let (_dir, engines) = engines();
    for engine in &engines {
        let outcome = engine
            .preview("quest", preview_request(json!({"location": "keep"}), &[]))
            .unwrap();
        engine.commit("quest", &outcome.id, Some("dm")).unwrap();

        let snapshot = engine
            .create_snapshot("quest", SaveType::Manual, Some("dm"))
            .unwrap();
        assert_eq!(snapshot.state.turn, 1);

        // Advance, then restore.
        let outcome = engine
            .preview("quest", preview_request(json!({"location": "pass"}), &[]))
            .unwrap();
        engine.commit("quest", &outcome.id, Some("dm")).unwrap();
        assert_eq!(engine.storage().load_state("quest").unwrap().turn, 2);

        let restored = engine
            .restore_snapshot("quest", &snapshot.save_id, Some("dm"))
            .unwrap();
        assert_eq!(restored.state.turn, 1);
        let state = engine.storage().load_state("quest").unwrap();
        assert_eq!(state.turn, 1);
        assert_eq!(state.location, "keep");

        // Unknown save id.
        assert!(engine
            .restore_snapshot("quest", "save-nope", Some("dm"))
            .is_err());
    }
}

#[test]
fn template_clone_starts_clean() {
    let (_dir, engines) = engines();
    for engine in &engines {
        // "quest" was cloned from the default template in the fixture.
        let state = engine.storage().load_state("quest").unwrap();
        assert_eq!(state.turn, 0);
        assert_eq!(state.log_index, 0);
        assert_eq!(engine.storage().transcript_len("quest").unwrap(), 0);
        assert_eq!(engine.storage().changelog_len("quest").unwrap(), 1);

        // The template's character came along.
        let character = engine.storage().load_character("quest").unwrap().unwrap();
        assert_eq!(character.slug, "the-wanderer");

        // Duplicate slug is refused.
        assert!(matches!(
            engine.create_session("quest", None, None),
            Err(Error::Conflict(_))
        ));

        // Unknown template is refused.
        assert!(matches!(
            engine.create_session("other", Some("no-such-template"), None),
            Err(Error::SessionMissing(_))
        ));
    }
}

#[tokio::test]
async fn bus_reports_commit_deltas() {
    let (_dir, engines) = engines();
    for engine in &engines {
        let mut rx = engine.bus().subscribe("quest");

        let outcome = engine
            .preview("quest", preview_request(json!({}), &["1d20"]))
            .unwrap();
        engine.commit("quest", &outcome.id, Some("dm")).unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.turn, Some(1));
        let transcript = update.transcript.unwrap();
        assert_eq!(transcript.lines.len(), 2); // entry + breakdown
        assert_eq!(transcript.cursor, 2);
        assert!(update.changelog.is_some());
        assert_eq!(update.rolls.unwrap().items.len(), 1);
    }
}
