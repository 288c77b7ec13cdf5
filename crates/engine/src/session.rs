//! Session lifecycle: template cloning and listing.

use chrono::Utc;
use serde_json::json;

use tf_domain::model::{CharacterRecord, SessionMeta, SessionState, SessionSummary};
use tf_domain::{Error, Result};

use crate::Engine;

impl Engine {
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.storage.list_sessions()
    }

    /// Create a session by cloning a template session and its
    /// character. The clone starts at `turn = 0`, `log_index = 0` with
    /// empty logs aside from the creation changelog line.
    pub fn create_session(
        &self,
        slug: &str,
        template: Option<&str>,
        world: Option<&str>,
    ) -> Result<SessionState> {
        let template_slug = template.unwrap_or(&self.settings.default_template);
        if slug == template_slug {
            return Err(Error::Conflict(format!(
                "cannot clone {slug} onto itself"
            )));
        }

        if !self.storage.session_exists(template_slug)? {
            if template_slug == self.settings.default_template {
                self.seed_default_template(template_slug)?;
            } else {
                return Err(Error::SessionMissing(template_slug.to_owned()));
            }
        }

        let template_meta = self.storage.load_meta(template_slug)?;
        let mut state = self.storage.load_state(template_slug)?;
        state.reset_for_new_session();
        let character = self.storage.load_character(template_slug)?;

        let now = Utc::now();
        let meta = SessionMeta {
            slug: slug.to_owned(),
            world: world.unwrap_or(&template_meta.world).to_owned(),
            created_at: now,
            updated_at: now,
        };
        let init_line = json!({
            "event": "session_created",
            "slug": slug,
            "template": template_slug,
        })
        .to_string();

        self.storage
            .create_session(&meta, &state, character.as_ref(), &init_line)?;
        tracing::info!(slug, template = template_slug, "session created");
        Ok(state)
    }

    /// Built-in minimal template, materialized on demand so a fresh
    /// deployment can create sessions before the operator installs
    /// adventure content.
    fn seed_default_template(&self, template_slug: &str) -> Result<()> {
        let now = Utc::now();
        let meta = SessionMeta {
            slug: template_slug.to_owned(),
            world: "greyvale".into(),
            created_at: now,
            updated_at: now,
        };
        let character = CharacterRecord {
            slug: "the-wanderer".into(),
            name: "The Wanderer".into(),
            sheet: json!({
                "class": "fighter",
                "level": 1,
                "abilities": {"str": 14, "dex": 12, "con": 13, "int": 10, "wis": 11, "cha": 10}
            }),
            updated_at: now,
        };
        let init_line = json!({
            "event": "template_seeded",
            "slug": template_slug,
        })
        .to_string();
        self.storage.create_session(
            &meta,
            &SessionState::starter(),
            Some(&character),
            &init_line,
        )?;
        tracing::info!(template = template_slug, "default template seeded");
        Ok(())
    }
}
