//! Effects stage: per-track effect settings
//!
//! Chooses effect sends for each instrument track. Values are clamped
//! into the export schema's ranges here and once more by QA during
//! final assembly. Fallback is the neutral setting for every track.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Stage;
use crate::error::Result;
use crate::generation::{parse_payload, GenerationClient};
use crate::song::ClipEffects;
use crate::state::{EffectsPlan, SharedState};
use crate::workflow::StageId;

pub struct EffectsStage {
    client: Arc<dyn GenerationClient>,
}

impl EffectsStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, state: &SharedState) -> String {
        let names: Vec<&str> = state
            .instrument_tracks
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        let mut prompt = String::from(
            "Choose effect settings per track as JSON: \
             {\"tracks\": {\"<track name>\": {\"reverb\": <0..1>, \"delay\": <0..1>, \
             \"distortion\": <0..1>, \"chorus\": <0..1>, \"filter\": <0..1>, \
             \"bitcrush\": <0..1>, \"pitchShift\": <-12..12>}}}.\n",
        );
        prompt.push_str(&format!("Tracks: {}\n", names.join(", ")));
        if let Some(style) = &state.request.custom_style {
            prompt.push_str(&format!("Style: {style}\n"));
        }
        prompt
    }

    fn neutral_plan(state: &SharedState) -> EffectsPlan {
        EffectsPlan {
            per_track: state
                .instrument_tracks
                .iter()
                .map(|t| (t.name.clone(), ClipEffects::neutral()))
                .collect(),
        }
    }
}

#[async_trait]
impl Stage for EffectsStage {
    fn id(&self) -> StageId {
        StageId::Effects
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        if state.instrument_tracks.is_empty() {
            debug!("no instrument tracks, writing empty effects plan");
            state.effects = Some(EffectsPlan::default());
            return Ok(());
        }

        let prompt = self.build_prompt(state);
        let plan = match self.client.complete(&prompt).await {
            Ok(raw) => match parse_payload::<EffectsPayload>(&raw) {
                Ok(payload) => {
                    let known: std::collections::BTreeSet<String> = state
                        .instrument_tracks
                        .iter()
                        .map(|t| t.name.clone())
                        .collect();
                    let mut plan = Self::neutral_plan(state);
                    for (name, settings) in payload.tracks {
                        if !known.contains(&name) {
                            state.push_error(
                                StageId::Effects,
                                format!("dropping effect settings for unknown track '{name}'"),
                            );
                            continue;
                        }
                        plan.per_track.insert(name, settings.into_effects());
                    }
                    plan
                }
                Err(e) => {
                    state.push_error(StageId::Effects, format!("{e}; using neutral effects"));
                    Self::neutral_plan(state)
                }
            },
            Err(e) => {
                state.push_error(
                    StageId::Effects,
                    format!("provider call failed ({e}); using neutral effects"),
                );
                Self::neutral_plan(state)
            }
        };

        debug!(tracks = plan.per_track.len(), "effects plan set");
        state.effects = Some(plan);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EffectsPayload {
    tracks: BTreeMap<String, EffectSettings>,
}

/// Lenient mirror of [`ClipEffects`]: all fields optional so a model
/// that only mentions two sends still parses.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EffectSettings {
    reverb: f64,
    delay: f64,
    distortion: f64,
    chorus: f64,
    filter: f64,
    bitcrush: f64,
    #[serde(rename = "pitchShift", alias = "pitch_shift")]
    pitch_shift: f64,
}

impl EffectSettings {
    fn into_effects(self) -> ClipEffects {
        ClipEffects {
            reverb: self.reverb,
            delay: self.delay,
            distortion: self.distortion,
            chorus: self.chorus,
            filter: self.filter,
            bitcrush: self.bitcrush,
            pitch_shift: self.pitch_shift,
        }
        .clamped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistries;
    use crate::song::{Track, TrackCategory};
    use crate::state::SongRequest;
    use crate::testing::mocks::MockGenerationClient;

    fn state_with_tracks() -> SharedState {
        let mut s = SharedState::new(
            SongRequest::new("test"),
            Arc::new(ResourceRegistries::builtin()),
        );
        s.instrument_tracks = vec![
            Track::new("keys", TrackCategory::Chords),
            Track::new("low end", TrackCategory::Bass),
        ];
        s
    }

    #[test]
    fn settings_are_clamped_and_unknown_tracks_dropped() {
        let client = Arc::new(
            MockGenerationClient::builder()
                .with_success(
                    "effect settings",
                    r#"{"tracks": {
                        "keys": {"reverb": 1.8, "pitchShift": -40},
                        "ghost track": {"reverb": 0.3}
                    }}"#,
                )
                .build(),
        );
        let mut state = state_with_tracks();
        tokio_test::block_on(EffectsStage::new(client).run(&mut state)).unwrap();
        let plan = state.effects.unwrap();
        let keys = &plan.per_track["keys"];
        assert_eq!(keys.reverb, 1.0);
        assert_eq!(keys.pitch_shift, -12.0);
        assert!(!plan.per_track.contains_key("ghost track"));
        // Unmentioned track still gets a neutral entry.
        assert_eq!(plan.per_track["low end"], ClipEffects::neutral());
        assert!(state.errors.iter().any(|e| e.contains("ghost track")));
    }

    #[test]
    fn provider_failure_yields_neutral_plan() {
        let client = Arc::new(MockGenerationClient::builder().failing().build());
        let mut state = state_with_tracks();
        tokio_test::block_on(EffectsStage::new(client).run(&mut state)).unwrap();
        let plan = state.effects.unwrap();
        assert_eq!(plan.per_track.len(), 2);
        assert!(plan.per_track.values().all(|e| *e == ClipEffects::neutral()));
        assert_eq!(state.errors.len(), 1);
    }
}
