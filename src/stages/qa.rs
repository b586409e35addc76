//! QA stage: final assembly and export gating
//!
//! The terminal stage and the only one with no provider call. Assembles
//! the `SongDescription` from every upstream output, normalizes all
//! value ranges one final time, prunes anything the registries cannot
//! supply, and is the only code allowed to set `ready_for_export`.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::Stage;
use crate::error::Result;
use crate::song::{Clip, SongDescription, Track, TrackCategory, VoicePart};
use crate::state::{CompositionParams, SharedState, VocalPlan};
use crate::workflow::StageId;

pub struct QaStage;

impl QaStage {
    pub fn new() -> Self {
        Self
    }

    fn title_from_idea(idea: &str) -> String {
        let words: Vec<&str> = idea.split_whitespace().take(6).collect();
        if words.is_empty() {
            return "Untitled".to_string();
        }
        let mut title = words.join(" ");
        if let Some(first) = title.get(0..1) {
            let upper = first.to_uppercase();
            title.replace_range(0..1, &upper);
        }
        title
    }

    /// Normalizes one instrument clip; returns `None` when the clip
    /// cannot appear in an exported song.
    fn sanitize_clip(mut clip: Clip, state: &mut SharedState, track_name: &str) -> Option<Clip> {
        if !state.registries.has_instrument(&clip.instrument) {
            state.push_error(
                StageId::Qa,
                format!(
                    "instrument '{}' not available, dropping a clip from track '{track_name}'",
                    clip.instrument
                ),
            );
            return None;
        }
        if !clip.duration.is_finite() || clip.duration <= 0.0 {
            state.push_error(
                StageId::Qa,
                format!("dropping zero-length clip from track '{track_name}'"),
            );
            return None;
        }
        if !clip.start.is_finite() || clip.start < 0.0 {
            clip.start = 0.0;
        }
        clip.volume = if clip.volume.is_finite() {
            clip.volume.clamp(0.0, 1.0)
        } else {
            0.8
        };
        clip.effects.clamp();
        Some(clip)
    }

    /// Builds the vocal track from the vocal plan, one lyrics clip per
    /// assigned section. Voices were validated by the Vocal stage;
    /// anything that slipped through is pruned here.
    fn build_vocal_track(state: &mut SharedState, vocals: &VocalPlan) -> Option<Track> {
        let arrangement = state.arrangement.clone().unwrap_or_default();
        let mut track = Track::new("lead vocals", TrackCategory::Vocal);
        for assignment in &vocals.assignments {
            if !state.registries.has_voice(&assignment.voice_id) {
                state.push_error(
                    StageId::Qa,
                    format!(
                        "voice '{}' not available, dropping vocals for section '{}'",
                        assignment.voice_id, assignment.section
                    ),
                );
                continue;
            }
            let Some(section) = arrangement
                .sections
                .iter()
                .find(|s| s.name == assignment.section)
            else {
                state.push_error(
                    StageId::Qa,
                    format!(
                        "section '{}' not in the arrangement, dropping its vocals",
                        assignment.section
                    ),
                );
                continue;
            };
            let mut clip = Clip::lyrics(track.id, section.start, section.duration);
            clip.voices = vec![VoicePart {
                voice_id: assignment.voice_id.clone(),
                fragments: assignment.fragments.clone(),
            }];
            track.clips.push(clip);
        }
        if track.clips.is_empty() {
            None
        } else {
            Some(track)
        }
    }
}

impl Default for QaStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for QaStage {
    fn id(&self) -> StageId {
        StageId::Qa
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        let composition = match state.composition.clone() {
            Some(c) => c,
            None => {
                state.push_error(
                    StageId::Qa,
                    "missing required field: composition parameters; exporting with fallback",
                );
                CompositionParams::fallback(&state.request)
            }
        };

        let effects = state.effects.clone().unwrap_or_default();
        let mut tracks = Vec::new();
        for mut track in std::mem::take(&mut state.instrument_tracks) {
            let track_effects = effects.per_track.get(&track.name).copied();
            let mut clips = Vec::with_capacity(track.clips.len());
            for mut clip in std::mem::take(&mut track.clips) {
                if let Some(fx) = track_effects {
                    clip.effects = fx;
                }
                if let Some(clip) = Self::sanitize_clip(clip, state, &track.name) {
                    clips.push(clip);
                }
            }
            if clips.is_empty() {
                state.push_error(
                    StageId::Qa,
                    format!("track '{}' has no exportable clips, dropping it", track.name),
                );
                continue;
            }
            track.clips = clips;
            tracks.push(track);
        }

        if let Some(vocals) = state.vocals.clone() {
            if let Some(vocal_track) = Self::build_vocal_track(state, &vocals) {
                tracks.push(vocal_track);
            }
        }

        let song = SongDescription {
            id: Uuid::new_v4(),
            title: Self::title_from_idea(&state.request.song_idea),
            tempo: composition.tempo,
            key: composition.key.clone(),
            time_signature: composition.time_signature,
            duration: composition.duration_secs,
            tracks,
            album_art: state.album_art.clone(),
            created_at: chrono::Utc::now(),
        };

        debug!(tracks = song.tracks.len(), title = %song.title, "song assembled");
        state.song = Some(song);
        state.ready_for_export = true;
        Ok(())
    }
}
