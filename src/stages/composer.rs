//! Composer stage: global musical parameters
//!
//! First stage of every run (and of every revision pass). Asks the
//! model for tempo, key, time signature, and duration. Documented
//! fallback: 120 BPM, key "C", 4/4, 180 seconds.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Stage;
use crate::error::Result;
use crate::generation::{parse_payload, GenerationClient};
use crate::song::TimeSignature;
use crate::state::{CompositionParams, SharedState, SongRequest};
use crate::workflow::StageId;

const TEMPO_MIN: f64 = 40.0;
const TEMPO_MAX: f64 = 220.0;
const DURATION_MIN: f64 = 30.0;
const DURATION_MAX: f64 = 600.0;

pub struct ComposerStage {
    client: Arc<dyn GenerationClient>,
}

impl ComposerStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, request: &SongRequest, revision_notes: &[String]) -> String {
        let mut prompt = String::from(
            "You are composing a song. Choose global composition parameters \
             and reply with a single JSON object: \
             {\"tempo\": <bpm>, \"key\": \"<key>\", \
             \"time_signature\": \"<beats>/<unit>\", \"duration_secs\": <seconds>}.\n",
        );
        prompt.push_str(&format!("Song idea: {}\n", request.song_idea));
        if let Some(style) = &request.custom_style {
            prompt.push_str(&format!("Style: {style}\n"));
        }
        if let Some(mood) = &request.mood {
            prompt.push_str(&format!("Mood: {mood}\n"));
        }
        if !request.style_tags.is_empty() {
            let tags: Vec<&str> = request.style_tags.iter().map(String::as_str).collect();
            prompt.push_str(&format!("Tags: {}\n", tags.join(", ")));
        }
        if let Some(key) = &request.key {
            prompt.push_str(&format!("Required key: {key}\n"));
        }
        prompt.push_str(&format!(
            "Target length: about {} seconds.\n",
            request.duration.target_secs()
        ));
        if !revision_notes.is_empty() {
            prompt.push_str("This is a revision pass. Address these review notes:\n");
            for note in revision_notes {
                prompt.push_str(&format!("- {note}\n"));
            }
        }
        prompt
    }

    fn sanitize(payload: ComposerPayload, state: &mut SharedState) -> CompositionParams {
        let request = &state.request;
        let mut warnings = Vec::new();

        let tempo = if payload.tempo.is_finite()
            && (TEMPO_MIN..=TEMPO_MAX).contains(&payload.tempo)
        {
            payload.tempo
        } else {
            warnings.push(format!("tempo {} out of range, using 120", payload.tempo));
            120.0
        };

        // A key pinned in the request always wins.
        let key = request
            .key
            .clone()
            .unwrap_or_else(|| payload.key.trim().to_string());
        let key = if key.is_empty() {
            warnings.push("empty key, using C".to_string());
            "C".to_string()
        } else {
            key
        };

        let time_signature = match TimeSignature::parse(&payload.time_signature) {
            Some(ts) => ts,
            None => {
                warnings.push(format!(
                    "unreadable time signature '{}', using 4/4",
                    payload.time_signature
                ));
                TimeSignature::COMMON
            }
        };

        let duration_secs = if payload.duration_secs.is_finite()
            && (DURATION_MIN..=DURATION_MAX).contains(&payload.duration_secs)
        {
            payload.duration_secs
        } else {
            let target = request.duration.target_secs();
            warnings.push(format!(
                "duration {} out of range, using {target}",
                payload.duration_secs
            ));
            target
        };

        for w in warnings {
            state.push_error(StageId::Composer, w);
        }

        CompositionParams {
            tempo,
            key,
            time_signature,
            duration_secs,
        }
    }
}

#[async_trait]
impl Stage for ComposerStage {
    fn id(&self) -> StageId {
        StageId::Composer
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        let prompt = self.build_prompt(&state.request, &state.review_notes);

        let params = match self.client.complete(&prompt).await {
            Ok(raw) => match parse_payload::<ComposerPayload>(&raw) {
                Ok(payload) => Self::sanitize(payload, state),
                Err(e) => {
                    state.push_error(
                        StageId::Composer,
                        format!("{e}; using fallback parameters"),
                    );
                    CompositionParams::fallback(&state.request)
                }
            },
            Err(e) => {
                state.push_error(
                    StageId::Composer,
                    format!("provider call failed ({e}); using fallback parameters"),
                );
                CompositionParams::fallback(&state.request)
            }
        };

        debug!(tempo = params.tempo, key = %params.key, "composition parameters set");
        state.composition = Some(params);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ComposerPayload {
    tempo: f64,
    key: String,
    time_signature: String,
    duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistries;
    use crate::testing::mocks::MockGenerationClient;

    fn run_with(response: &str) -> SharedState {
        let client = Arc::new(
            MockGenerationClient::builder()
                .with_success("composition parameters", response)
                .build(),
        );
        let mut state = SharedState::new(
            SongRequest::new("a breezy bossa nova"),
            Arc::new(ResourceRegistries::builtin()),
        );
        let stage = ComposerStage::new(client);
        tokio_test::block_on(stage.run(&mut state)).unwrap();
        state
    }

    #[test]
    fn parses_well_formed_parameters() {
        let state = run_with(
            r#"{"tempo": 96, "key": "Am", "time_signature": "3/4", "duration_secs": 200}"#,
        );
        let params = state.composition.unwrap();
        assert_eq!(params.tempo, 96.0);
        assert_eq!(params.key, "Am");
        assert_eq!(params.time_signature, TimeSignature { beats: 3, unit: 4 });
        assert_eq!(params.duration_secs, 200.0);
        assert!(state.errors.is_empty());
    }

    #[test]
    fn malformed_output_falls_back_to_documented_defaults() {
        let state = run_with("I'd rather talk about the weather.");
        let params = state.composition.unwrap();
        assert_eq!(params.tempo, 120.0);
        assert_eq!(params.key, "C");
        assert_eq!(params.time_signature, TimeSignature::COMMON);
        assert_eq!(params.duration_secs, 180.0);
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].starts_with("composer:"));
    }

    #[test]
    fn out_of_range_values_are_sanitized_individually() {
        let state = run_with(
            r#"{"tempo": 900, "key": "D", "time_signature": "common", "duration_secs": 240}"#,
        );
        let params = state.composition.unwrap();
        assert_eq!(params.tempo, 120.0);
        assert_eq!(params.key, "D");
        assert_eq!(params.time_signature, TimeSignature::COMMON);
        assert_eq!(params.duration_secs, 240.0);
        assert_eq!(state.errors.len(), 2);
    }

    #[test]
    fn provider_failure_is_not_fatal() {
        let client = Arc::new(MockGenerationClient::builder().failing().build());
        let mut state = SharedState::new(
            SongRequest::new("idea"),
            Arc::new(ResourceRegistries::builtin()),
        );
        let stage = ComposerStage::new(client);
        tokio_test::block_on(stage.run(&mut state)).unwrap();
        assert!(state.composition.is_some());
        assert_eq!(state.errors.len(), 1);
    }
}
