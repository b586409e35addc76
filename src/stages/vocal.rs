//! Vocal stage: voice assignment and melody
//!
//! Maps each lyric section to a voice model from the registry and lays
//! the lines onto a melody. Unknown voice ids are replaced with the
//! first registry voice (or the assignment is dropped when the registry
//! has no voices at all). Fallback assigns the first registry voice to
//! every section with a default melody.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{build_fragments, midi_root, Stage};
use crate::error::Result;
use crate::generation::{parse_payload, GenerationClient};
use crate::state::{LyricSheet, SharedState, VocalAssignment, VocalPlan};
use crate::workflow::StageId;

pub struct VocalStage {
    client: Arc<dyn GenerationClient>,
}

impl VocalStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, state: &SharedState, lyrics: &LyricSheet) -> String {
        let voices: Vec<&str> = state.registries.voices.iter().map(String::as_str).collect();
        let sections: Vec<&str> = lyrics
            .sections
            .iter()
            .map(|s| s.section.as_str())
            .collect();
        let mut prompt = String::from(
            "Produce vocal assignments for the song as JSON: \
             {\"assignments\": [{\"section\": \"<name>\", \"voice_id\": \"<voice>\", \
             \"melody\": [<midi note numbers>]}]}.\n",
        );
        prompt.push_str(&format!(
            "Sections with lyrics: {}\nAvailable voices: {}\n",
            sections.join(", "),
            voices.join(", ")
        ));
        if let Some(mood) = &state.request.mood {
            prompt.push_str(&format!("Mood: {mood}\n"));
        }
        prompt
    }

    fn default_melody(key: &str) -> Vec<u8> {
        let root = midi_root(key);
        // Pentatonic run around the root.
        vec![root, root + 2, root + 4, root + 7, root + 9, root + 7, root + 4]
    }

    fn fallback_plan(state: &mut SharedState, lyrics: &LyricSheet, tempo: f64, key: &str) -> VocalPlan {
        let first_voice = state.registries.first_voice().map(String::from);
        let Some(voice) = first_voice else {
            state.push_error(
                StageId::Vocal,
                "no voices available in the registry; dropping all vocal assignments",
            );
            return VocalPlan::default();
        };
        let melody = Self::default_melody(key);
        let assignments = lyrics
            .sections
            .iter()
            .map(|s| VocalAssignment {
                section: s.section.clone(),
                voice_id: voice.clone(),
                fragments: build_fragments(&s.lines, &melody, tempo),
            })
            .collect();
        VocalPlan { assignments }
    }
}

#[async_trait]
impl Stage for VocalStage {
    fn id(&self) -> StageId {
        StageId::Vocal
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        let lyrics = state.lyrics.clone().unwrap_or_default();
        if lyrics.is_empty() {
            debug!("no lyrics to sing, writing empty vocal plan");
            state.vocals = Some(VocalPlan::default());
            return Ok(());
        }

        let (tempo, key) = state
            .composition
            .as_ref()
            .map(|c| (c.tempo, c.key.clone()))
            .unwrap_or((120.0, "C".to_string()));

        let prompt = self.build_prompt(state, &lyrics);
        let plan = match self.client.complete(&prompt).await {
            Ok(raw) => match parse_payload::<VocalPayload>(&raw) {
                Ok(payload) => {
                    let mut assignments = Vec::new();
                    for a in payload.assignments {
                        let Some(lyric_section) = lyrics
                            .sections
                            .iter()
                            .find(|s| s.section.eq_ignore_ascii_case(a.section.trim()))
                        else {
                            state.push_error(
                                StageId::Vocal,
                                format!("dropping assignment for unknown section '{}'", a.section),
                            );
                            continue;
                        };

                        let voice_id = if state.registries.has_voice(&a.voice_id) {
                            a.voice_id
                        } else {
                            let substitute = state.registries.first_voice().map(String::from);
                            match substitute {
                                Some(fallback) => {
                                    state.push_error(
                                        StageId::Vocal,
                                        format!(
                                            "voice '{}' not available, substituting '{fallback}'",
                                            a.voice_id
                                        ),
                                    );
                                    fallback
                                }
                                None => {
                                    state.push_error(
                                        StageId::Vocal,
                                        format!(
                                            "voice '{}' not available and registry is empty; \
                                             dropping assignment",
                                            a.voice_id
                                        ),
                                    );
                                    continue;
                                }
                            }
                        };

                        let melody = a.melody.unwrap_or_else(|| Self::default_melody(&key));
                        assignments.push(VocalAssignment {
                            section: lyric_section.section.clone(),
                            voice_id,
                            fragments: build_fragments(&lyric_section.lines, &melody, tempo),
                        });
                    }
                    if assignments.is_empty() {
                        state.push_error(
                            StageId::Vocal,
                            "no usable assignments generated; using fallback voice plan",
                        );
                        Self::fallback_plan(state, &lyrics, tempo, &key)
                    } else {
                        VocalPlan { assignments }
                    }
                }
                Err(e) => {
                    state.push_error(StageId::Vocal, format!("{e}; using fallback voice plan"));
                    Self::fallback_plan(state, &lyrics, tempo, &key)
                }
            },
            Err(e) => {
                state.push_error(
                    StageId::Vocal,
                    format!("provider call failed ({e}); using fallback voice plan"),
                );
                Self::fallback_plan(state, &lyrics, tempo, &key)
            }
        };

        debug!(assignments = plan.assignments.len(), "vocal plan set");
        state.vocals = Some(plan);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct VocalPayload {
    assignments: Vec<AssignmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AssignmentPayload {
    section: String,
    voice_id: String,
    #[serde(default)]
    melody: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistries;
    use crate::state::{LyricSection, SongRequest};
    use crate::testing::mocks::MockGenerationClient;

    fn state_with_lyrics() -> SharedState {
        let mut s = SharedState::new(
            SongRequest::new("a song"),
            Arc::new(ResourceRegistries::builtin()),
        );
        s.composition = Some(crate::state::CompositionParams::fallback(&s.request));
        s.lyrics = Some(LyricSheet {
            sections: vec![LyricSection {
                section: "verse".to_string(),
                lines: vec!["hello world".to_string()],
            }],
        });
        s
    }

    #[test]
    fn known_voice_is_kept() {
        let client = Arc::new(
            MockGenerationClient::builder()
                .with_success(
                    "vocal assignments",
                    r#"{"assignments": [{"section": "verse", "voice_id": "aria", "melody": [60, 62]}]}"#,
                )
                .build(),
        );
        let mut state = state_with_lyrics();
        tokio_test::block_on(VocalStage::new(client).run(&mut state)).unwrap();
        let plan = state.vocals.unwrap();
        assert_eq!(plan.assignments[0].voice_id, "aria");
        assert!(state.errors.is_empty());
    }

    #[test]
    fn unknown_voice_is_substituted_with_warning() {
        let client = Arc::new(
            MockGenerationClient::builder()
                .with_success(
                    "vocal assignments",
                    r#"{"assignments": [{"section": "verse", "voice_id": "pavarotti"}]}"#,
                )
                .build(),
        );
        let mut state = state_with_lyrics();
        tokio_test::block_on(VocalStage::new(client).run(&mut state)).unwrap();
        let plan = state.vocals.unwrap();
        assert_eq!(plan.assignments.len(), 1);
        assert!(state.registries.has_voice(&plan.assignments[0].voice_id));
        assert!(state.errors.iter().any(|e| e.contains("pavarotti")));
    }

    #[test]
    fn empty_lyrics_produce_empty_plan_without_calls() {
        let client = Arc::new(MockGenerationClient::builder().failing().build());
        let mut state = state_with_lyrics();
        state.lyrics = Some(LyricSheet::default());
        tokio_test::block_on(VocalStage::new(client.clone()).run(&mut state)).unwrap();
        assert!(state.vocals.unwrap().assignments.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn fallback_assigns_first_registry_voice() {
        let client = Arc::new(MockGenerationClient::builder().failing().build());
        let mut state = state_with_lyrics();
        tokio_test::block_on(VocalStage::new(client).run(&mut state)).unwrap();
        let plan = state.vocals.unwrap();
        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].voice_id, "aria");
        assert!(!plan.assignments[0].fragments.is_empty());
    }
}
