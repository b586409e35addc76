//! Review stage: structural check plus model critique
//!
//! Runs a local completeness check first (a missing upstream output is
//! recorded with the critical `missing required field` marker), then
//! asks the model for an overall recommendation. The recommendation
//! alone never forces a revision; `review_decision` requires a critical
//! error on record as well. Fallback recommendation is `approve`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Stage;
use crate::error::Result;
use crate::generation::{parse_payload, GenerationClient};
use crate::state::{Recommendation, ReviewOutcome, SharedState};
use crate::workflow::StageId;

pub struct ReviewStage {
    client: Arc<dyn GenerationClient>,
}

impl ReviewStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    /// Local schema check over the upstream outputs.
    fn check_required_fields(state: &mut SharedState) {
        if state.composition.is_none() {
            state.push_error(
                StageId::Review,
                "missing required field: composition parameters",
            );
        }
        if state.arrangement.as_ref().map_or(true, |a| a.sections.is_empty()) {
            state.push_error(StageId::Review, "missing required field: arrangement plan");
        }
        if state.instrument_tracks.is_empty() {
            state.push_error(
                StageId::Review,
                "missing required field: instrument tracks",
            );
        }
        if state.request.wants_vocals() {
            let has_vocals = state
                .vocals
                .as_ref()
                .is_some_and(|v| !v.assignments.is_empty());
            if !has_vocals {
                state.push_error(
                    StageId::Review,
                    "missing required field: vocal assignments",
                );
            }
        }
    }

    fn build_prompt(&self, state: &SharedState) -> String {
        let mut prompt = String::from(
            "Review the draft song and reply as JSON: \
             {\"recommendation\": \"approve\" | \"revise\", \"notes\": [\"...\"]}.\n",
        );
        prompt.push_str(&format!("Song idea: {}\n", state.request.song_idea));
        if let Some(c) = &state.composition {
            prompt.push_str(&format!(
                "Composition: {} BPM, key {}, {}, {:.0}s\n",
                c.tempo, c.key, c.time_signature, c.duration_secs
            ));
        }
        if let Some(a) = &state.arrangement {
            prompt.push_str(&format!("Sections: {}\n", a.sections.len()));
        }
        prompt.push_str(&format!(
            "Instrument tracks: {}\nDiagnostics so far: {}\n",
            state.instrument_tracks.len(),
            state.errors.len()
        ));
        for error in &state.errors {
            prompt.push_str(&format!("- {error}\n"));
        }
        prompt
    }
}

#[async_trait]
impl Stage for ReviewStage {
    fn id(&self) -> StageId {
        StageId::Review
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        Self::check_required_fields(state);

        let prompt = self.build_prompt(state);
        let outcome = match self.client.complete(&prompt).await {
            Ok(raw) => match parse_payload::<ReviewPayload>(&raw) {
                Ok(payload) => ReviewOutcome {
                    recommendation: payload.recommendation,
                    notes: payload.notes,
                },
                Err(e) => {
                    state.push_error(StageId::Review, format!("{e}; treating as approval"));
                    ReviewOutcome {
                        recommendation: Recommendation::Approve,
                        notes: vec![],
                    }
                }
            },
            Err(e) => {
                state.push_error(
                    StageId::Review,
                    format!("provider call failed ({e}); treating as approval"),
                );
                ReviewOutcome {
                    recommendation: Recommendation::Approve,
                    notes: vec![],
                }
            }
        };

        debug!(recommendation = ?outcome.recommendation, notes = outcome.notes.len(), "review recorded");
        state.review_notes.extend(outcome.notes.iter().cloned());
        state.review = Some(outcome);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    recommendation: Recommendation,
    #[serde(default)]
    notes: Vec<String>,
}
