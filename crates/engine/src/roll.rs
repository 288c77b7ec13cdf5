//! Ad-hoc rolls outside the turn protocol.
//!
//! A roll consumes the next entropy index under the session lock and
//! bumps `state.log_index` immediately. Because the cursor lives in the
//! hashed state, any parked preview becomes stale the moment a roll
//! lands: the reservation plan it witnessed no longer starts at the
//! right index.

use serde::Serialize;

use tf_domain::model::RollResult;
use tf_domain::Result;

use crate::bus::{LogDelta, RollsDelta, SessionUpdate};
use crate::Engine;

#[derive(Debug, Clone, Serialize)]
pub struct RollOutcome {
    #[serde(flatten)]
    pub result: RollResult,
    /// Human phrase appended to the transcript.
    pub phrase: String,
    pub transcript_len: u64,
}

impl Engine {
    /// Roll `expression` for the session, outside any turn.
    pub fn roll(
        &self,
        slug: &str,
        expression: &str,
        label: Option<&str>,
        lock_owner: Option<&str>,
    ) -> Result<RollOutcome> {
        self.locks.require(slug, lock_owner)?;

        let mut state = self.storage.load_state(slug)?;
        let next_index = state.log_index + 1;
        self.entropy.ensure_available(next_index)?;
        let entry = self.entropy.load(next_index)?;

        let result = tf_dice::evaluate(expression, &entry)?;

        state.log_index = next_index;
        self.storage.save_state(slug, &state)?;

        let phrase = match label {
            Some(label) => format!("{label}: {}", result.breakdown),
            None => format!("Roll {}", result.breakdown),
        };
        let transcript_len = self
            .storage
            .append_transcript(slug, &[phrase.clone()])?;

        // Attach the roll to the current turn's record when one exists.
        if self.storage.load_turn_record(slug, state.turn)?.is_some() {
            self.storage
                .append_rolls_to_turn(slug, state.turn, std::slice::from_ref(&result))?;
        }

        self.bus.publish(
            slug,
            SessionUpdate {
                turn: Some(state.turn),
                transcript: Some(LogDelta {
                    lines: vec![phrase.clone()],
                    cursor: transcript_len,
                }),
                changelog: None,
                rolls: Some(RollsDelta {
                    turn: state.turn,
                    items: vec![result.clone()],
                }),
            },
        );

        tracing::info!(
            slug,
            expression,
            total = result.total,
            index = next_index,
            "roll resolved"
        );

        Ok(RollOutcome {
            result,
            phrase,
            transcript_len,
        })
    }
}
