//! Instrument stage: instrumental track content
//!
//! Builds the note-level tracks from the arrangement and composition.
//! Every instrument name in the generated output is checked against the
//! registry; tracks referencing unavailable instruments are dropped
//! with a warning. Fallback is a chord/bass/drum bed derived from the
//! arrangement sections.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{midi_root, Stage};
use crate::error::Result;
use crate::generation::{parse_payload, GenerationClient};
use crate::song::{Clip, Note, Track, TrackCategory};
use crate::state::{ArrangementPlan, CompositionParams, SharedState};
use crate::workflow::StageId;

pub struct InstrumentStage {
    client: Arc<dyn GenerationClient>,
}

impl InstrumentStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, state: &SharedState, composition: &CompositionParams) -> String {
        let mut prompt = String::from(
            "Compose the instrument tracks for the song as JSON: \
             {\"tracks\": [{\"name\": \"<label>\", \
             \"category\": \"chords|bass|drums|lead|pad\", \
             \"instrument\": \"<registry name>\", \
             \"clips\": [{\"start\": <s>, \"duration\": <s>, \
             \"volume\": <0..1>, \"pitches\": [<midi>]}]}]}. \
             Use only instruments from the list below.\n",
        );
        for (category, names) in &state.registries.instruments {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            prompt.push_str(&format!("{category}: {}\n", names.join(", ")));
        }
        prompt.push_str(&format!(
            "Tempo {} BPM, key {}. Sections:\n",
            composition.tempo, composition.key
        ));
        if let Some(plan) = &state.arrangement {
            for s in &plan.sections {
                prompt.push_str(&format!(
                    "- {} at {:.1}s for {:.1}s (energy {:.2})\n",
                    s.name, s.start, s.duration, s.energy
                ));
            }
        }
        prompt
    }

    fn convert_track(payload: TrackPayload, state: &mut SharedState) -> Option<Track> {
        if !state.registries.has_instrument(&payload.instrument) {
            state.push_error(
                StageId::Instrument,
                format!(
                    "instrument '{}' not available, dropping track '{}'",
                    payload.instrument, payload.name
                ),
            );
            return None;
        }

        let mut track = Track::new(payload.name, payload.category);
        for clip in payload.clips {
            if !clip.start.is_finite()
                || clip.start < 0.0
                || !clip.duration.is_finite()
                || clip.duration <= 0.0
            {
                state.push_error(
                    StageId::Instrument,
                    format!("dropping clip with bad timing in track '{}'", track.name),
                );
                continue;
            }
            let mut c = Clip::note(track.id, payload.instrument.clone(), clip.start, clip.duration);
            c.volume = if clip.volume.is_finite() {
                clip.volume.clamp(0.0, 1.0)
            } else {
                0.8
            };
            c.notes = clip
                .pitches
                .iter()
                .map(|&pitch| Note {
                    pitch,
                    start: 0.0,
                    duration: clip.duration,
                })
                .collect();
            track.clips.push(c);
        }

        if track.clips.is_empty() {
            state.push_error(
                StageId::Instrument,
                format!("track '{}' ended up with no clips, dropping it", track.name),
            );
            return None;
        }
        Some(track)
    }

    /// Chord/bass/drum bed derived from the arrangement. Only emits
    /// tracks for categories the registry can actually supply.
    fn fallback_bed(
        state: &mut SharedState,
        plan: &ArrangementPlan,
        composition: &CompositionParams,
    ) -> Vec<Track> {
        let root = midi_root(&composition.key);
        let beat = 60.0 / composition.tempo.max(1.0);
        let mut tracks = Vec::new();

        let picks: [(&str, TrackCategory); 3] = [
            ("chords", TrackCategory::Chords),
            ("bass", TrackCategory::Bass),
            ("drums", TrackCategory::Drums),
        ];
        for (category, track_category) in picks {
            let first = state
                .registries
                .first_instrument_in(category)
                .map(String::from);
            let Some(instrument) = first else {
                state.push_error(
                    StageId::Instrument,
                    format!("no '{category}' instruments available for the fallback bed"),
                );
                continue;
            };

            let mut track = Track::new(format!("fallback {category}"), track_category);
            for section in &plan.sections {
                let mut clip = Clip::note(track.id, instrument.clone(), section.start, section.duration);
                clip.volume = (0.5 + section.energy * 0.4).clamp(0.0, 1.0);
                clip.notes = match track_category {
                    TrackCategory::Chords => [0u8, 4, 7]
                        .iter()
                        .map(|&offset| Note {
                            pitch: root + offset,
                            start: 0.0,
                            duration: section.duration,
                        })
                        .collect(),
                    TrackCategory::Bass => vec![Note {
                        pitch: root.saturating_sub(12),
                        start: 0.0,
                        duration: section.duration,
                    }],
                    _ => {
                        // Alternating kick/snare on the beat.
                        let beats = (section.duration / beat).floor() as usize;
                        (0..beats)
                            .map(|i| Note {
                                pitch: if i % 2 == 0 { 36 } else { 38 },
                                start: i as f64 * beat,
                                duration: beat * 0.5,
                            })
                            .collect()
                    }
                };
                track.clips.push(clip);
            }
            if !track.clips.is_empty() {
                tracks.push(track);
            }
        }
        tracks
    }
}

#[async_trait]
impl Stage for InstrumentStage {
    fn id(&self) -> StageId {
        StageId::Instrument
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        let composition = state
            .composition
            .clone()
            .unwrap_or_else(|| CompositionParams::fallback(&state.request));
        let plan = state.arrangement.clone().unwrap_or_default();
        let prompt = self.build_prompt(state, &composition);

        let tracks = match self.client.complete(&prompt).await {
            Ok(raw) => match parse_payload::<InstrumentPayload>(&raw) {
                Ok(payload) => {
                    let tracks: Vec<Track> = payload
                        .tracks
                        .into_iter()
                        .filter_map(|t| Self::convert_track(t, state))
                        .collect();
                    if tracks.is_empty() {
                        state.push_error(
                            StageId::Instrument,
                            "no usable tracks generated; using fallback bed",
                        );
                        Self::fallback_bed(state, &plan, &composition)
                    } else {
                        tracks
                    }
                }
                Err(e) => {
                    state.push_error(StageId::Instrument, format!("{e}; using fallback bed"));
                    Self::fallback_bed(state, &plan, &composition)
                }
            },
            Err(e) => {
                state.push_error(
                    StageId::Instrument,
                    format!("provider call failed ({e}); using fallback bed"),
                );
                Self::fallback_bed(state, &plan, &composition)
            }
        };

        debug!(tracks = tracks.len(), "instrument tracks built");
        state.instrument_tracks = tracks;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct InstrumentPayload {
    tracks: Vec<TrackPayload>,
}

#[derive(Debug, Deserialize)]
struct TrackPayload {
    name: String,
    category: TrackCategory,
    instrument: String,
    clips: Vec<ClipPayload>,
}

#[derive(Debug, Deserialize)]
struct ClipPayload {
    start: f64,
    duration: f64,
    #[serde(default = "default_volume")]
    volume: f64,
    #[serde(default)]
    pitches: Vec<u8>,
}

fn default_volume() -> f64 {
    0.8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistries;
    use crate::state::SongRequest;
    use crate::testing::mocks::MockGenerationClient;

    fn prepared_state() -> SharedState {
        let mut s = SharedState::new(
            SongRequest::new("test"),
            Arc::new(ResourceRegistries::builtin()),
        );
        s.composition = Some(CompositionParams::fallback(&s.request));
        s.arrangement = Some(super::super::ArrangementStage::fallback_plan(180.0));
        s
    }

    #[test]
    fn unknown_instruments_are_pruned_with_warning() {
        let client = Arc::new(
            MockGenerationClient::builder()
                .with_success(
                    "instrument tracks",
                    r#"{"tracks": [
                        {"name": "keys", "category": "chords", "instrument": "piano",
                         "clips": [{"start": 0, "duration": 20, "pitches": [60, 64, 67]}]},
                        {"name": "space organ", "category": "pad", "instrument": "theremin",
                         "clips": [{"start": 0, "duration": 20, "pitches": [72]}]}
                    ]}"#,
                )
                .build(),
        );
        let mut state = prepared_state();
        tokio_test::block_on(InstrumentStage::new(client).run(&mut state)).unwrap();
        assert_eq!(state.instrument_tracks.len(), 1);
        assert_eq!(state.instrument_tracks[0].clips[0].instrument, "piano");
        assert!(state.errors.iter().any(|e| e.contains("theremin")));
    }

    #[test]
    fn out_of_range_volume_is_clamped() {
        let client = Arc::new(
            MockGenerationClient::builder()
                .with_success(
                    "instrument tracks",
                    r#"{"tracks": [{"name": "keys", "category": "chords",
                        "instrument": "piano",
                        "clips": [{"start": 0, "duration": 10, "volume": 4.5, "pitches": [60]}]}]}"#,
                )
                .build(),
        );
        let mut state = prepared_state();
        tokio_test::block_on(InstrumentStage::new(client).run(&mut state)).unwrap();
        assert_eq!(state.instrument_tracks[0].clips[0].volume, 1.0);
    }

    #[test]
    fn fallback_bed_covers_the_arrangement() {
        let client = Arc::new(MockGenerationClient::builder().failing().build());
        let mut state = prepared_state();
        tokio_test::block_on(InstrumentStage::new(client).run(&mut state)).unwrap();
        assert_eq!(state.instrument_tracks.len(), 3);
        for track in &state.instrument_tracks {
            assert_eq!(track.clips.len(), 6); // one clip per fallback section
            for clip in &track.clips {
                assert!(state.registries.has_instrument(&clip.instrument));
            }
        }
    }

    #[test]
    fn empty_registry_yields_no_tracks_but_no_panic() {
        let client = Arc::new(MockGenerationClient::builder().failing().build());
        let mut state = prepared_state();
        state.registries = Arc::new(ResourceRegistries::default());
        tokio_test::block_on(InstrumentStage::new(client).run(&mut state)).unwrap();
        assert!(state.instrument_tracks.is_empty());
        assert!(state.errors.len() >= 3);
    }
}
