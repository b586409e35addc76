//! Shared state threaded through the generation workflow
//!
//! One [`SharedState`] exists per generation request. It is owned by
//! exactly one stage at a time, so no locking is involved: the engine
//! hands it to the current stage, the stage writes only the output field
//! it owns, and the engine moves on. Diagnostics (`errors`,
//! `review_notes`) are append-only for the life of the run.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::registry::ResourceRegistries;
use crate::song::{ClipEffects, SongDescription, TimeSignature, Track};
use crate::workflow::StageId;

/// Marker substrings that identify a critical content error. The review
/// decision only honors a "revise" recommendation when at least one
/// recorded error contains one of these.
pub const CRITICAL_MARKERS: [&str; 3] =
    ["missing required field", "invalid schema", "broken structure"];

/// At most one full re-run of the pipeline per request.
pub const MAX_REVISIONS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricsOption {
    Auto,
    Custom,
    None,
}

impl Default for LyricsOption {
    fn default() -> Self {
        LyricsOption::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationClass {
    Short,
    Standard,
    Extended,
}

impl DurationClass {
    /// Target song length in seconds for prompt construction and
    /// fallback plans.
    pub fn target_secs(self) -> f64 {
        match self {
            DurationClass::Short => 90.0,
            DurationClass::Standard => 180.0,
            DurationClass::Extended => 300.0,
        }
    }
}

impl Default for DurationClass {
    fn default() -> Self {
        DurationClass::Standard
    }
}

/// The immutable input to a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongRequest {
    pub song_idea: String,
    #[serde(default)]
    pub custom_style: Option<String>,
    #[serde(default)]
    pub lyrics_option: LyricsOption,
    #[serde(default)]
    pub custom_lyrics: Option<String>,
    #[serde(default)]
    pub is_instrumental: bool,
    #[serde(default)]
    pub duration: DurationClass,
    /// Target key, e.g. "C" or "F#m". Honored by the Composer stage,
    /// including in its fallback.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub style_tags: BTreeSet<String>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

impl SongRequest {
    pub fn new(song_idea: impl Into<String>) -> Self {
        Self {
            song_idea: song_idea.into(),
            custom_style: None,
            lyrics_option: LyricsOption::Auto,
            custom_lyrics: None,
            is_instrumental: false,
            duration: DurationClass::Standard,
            key: None,
            mood: None,
            style_tags: BTreeSet::new(),
            provider: default_provider(),
            model: default_model(),
        }
    }

    /// Whether the run should produce any sung content at all.
    pub fn wants_vocals(&self) -> bool {
        !self.is_instrumental && self.lyrics_option != LyricsOption::None
    }
}

/// Global musical parameters produced by the Composer stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionParams {
    pub tempo: f64,
    pub key: String,
    pub time_signature: TimeSignature,
    pub duration_secs: f64,
}

impl CompositionParams {
    /// Documented Composer fallback: 120 BPM, key "C" (unless the
    /// request pinned one), 4/4, 180 seconds.
    pub fn fallback(request: &SongRequest) -> Self {
        Self {
            tempo: 120.0,
            key: request.key.clone().unwrap_or_else(|| "C".to_string()),
            time_signature: TimeSignature::COMMON,
            duration_secs: 180.0,
        }
    }
}

/// One section of the arrangement plan; times in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub start: f64,
    pub duration: f64,
    /// Relative intensity in [0, 1], used to shape instrumentation.
    pub energy: f64,
}

impl Section {
    /// Sections that carry sung lyrics.
    pub fn is_singable(&self) -> bool {
        let n = self.name.to_ascii_lowercase();
        n.contains("verse") || n.contains("chorus") || n.contains("bridge")
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArrangementPlan {
    pub sections: Vec<Section>,
}

impl ArrangementPlan {
    pub fn total_duration(&self) -> f64 {
        self.sections.iter().map(|s| s.end()).fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricSection {
    pub section: String,
    pub lines: Vec<String>,
}

/// Lyrics keyed by arrangement section, in section order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LyricSheet {
    pub sections: Vec<LyricSection>,
}

impl LyricSheet {
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.lines.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocalAssignment {
    pub section: String,
    pub voice_id: String,
    pub fragments: Vec<crate::song::LyricFragment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VocalPlan {
    pub assignments: Vec<VocalAssignment>,
}

/// Per-track effect settings chosen by the Effects stage; applied to
/// clips by QA during final assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectsPlan {
    pub per_track: std::collections::BTreeMap<String, ClipEffects>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    Revise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub recommendation: Recommendation,
    pub notes: Vec<String>,
}

/// The single mutable record threaded through every stage.
#[derive(Debug, Clone)]
pub struct SharedState {
    pub request: SongRequest,
    pub registries: Arc<ResourceRegistries>,

    // Per-stage outputs; each written only by the stage that owns it.
    pub composition: Option<CompositionParams>,
    pub arrangement: Option<ArrangementPlan>,
    pub lyrics: Option<LyricSheet>,
    pub vocals: Option<VocalPlan>,
    pub instrument_tracks: Vec<Track>,
    pub effects: Option<EffectsPlan>,
    pub review: Option<ReviewOutcome>,
    pub album_art: Option<String>,
    pub song: Option<SongDescription>,

    // Bookkeeping.
    pub errors: Vec<String>,
    pub review_notes: Vec<String>,
    pub revision_count: u32,
    pub max_revisions: u32,
    pub current_stage: StageId,
    pub ready_for_export: bool,
}

impl SharedState {
    pub fn new(request: SongRequest, registries: Arc<ResourceRegistries>) -> Self {
        Self {
            request,
            registries,
            composition: None,
            arrangement: None,
            lyrics: None,
            vocals: None,
            instrument_tracks: Vec::new(),
            effects: None,
            review: None,
            album_art: None,
            song: None,
            errors: Vec::new(),
            review_notes: Vec::new(),
            revision_count: 0,
            max_revisions: MAX_REVISIONS,
            current_stage: StageId::Composer,
            ready_for_export: false,
        }
    }

    /// Records a recoverable diagnostic. Entries are append-only.
    pub fn push_error(&mut self, stage: StageId, message: impl AsRef<str>) {
        self.errors
            .push(format!("{}: {}", stage.as_str(), message.as_ref()));
    }

    /// True when any recorded error carries a critical marker.
    pub fn has_critical_error(&self) -> bool {
        self.errors
            .iter()
            .any(|e| CRITICAL_MARKERS.iter().any(|m| e.contains(m)))
    }

    /// Clears every downstream output when the graph loops back to the
    /// Composer stage, so the second pass recomputes the whole song
    /// rather than risking stale data surviving past the final review.
    /// Diagnostics, the request, and the registries are kept.
    pub fn reset_for_revision(&mut self) {
        self.composition = None;
        self.arrangement = None;
        self.lyrics = None;
        self.vocals = None;
        self.instrument_tracks.clear();
        self.effects = None;
        self.review = None;
        self.album_art = None;
        self.song = None;
        self.ready_for_export = false;
    }
}

/// Read-only snapshot of whatever stage outputs were populated when a
/// run aborted; attached to `FailureResult` for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PartialState {
    pub composition: Option<CompositionParams>,
    pub arrangement: Option<ArrangementPlan>,
    pub lyrics: Option<LyricSheet>,
    pub vocals: Option<VocalPlan>,
    pub instrument_tracks: Vec<Track>,
    pub effects: Option<EffectsPlan>,
    pub review: Option<ReviewOutcome>,
    pub album_art: Option<String>,
    pub revision_count: u32,
    pub last_stage: StageId,
}

impl PartialState {
    pub fn capture(state: &SharedState) -> Self {
        Self {
            composition: state.composition.clone(),
            arrangement: state.arrangement.clone(),
            lyrics: state.lyrics.clone(),
            vocals: state.vocals.clone(),
            instrument_tracks: state.instrument_tracks.clone(),
            effects: state.effects.clone(),
            review: state.review.clone(),
            album_art: state.album_art.clone(),
            revision_count: state.revision_count,
            last_stage: state.current_stage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedState {
        SharedState::new(
            SongRequest::new("a test song"),
            Arc::new(ResourceRegistries::builtin()),
        )
    }

    #[test]
    fn critical_marker_detection() {
        let mut s = state();
        s.push_error(StageId::Composer, "provider returned gibberish");
        assert!(!s.has_critical_error());
        s.push_error(StageId::Arrangement, "broken structure: sections overlap");
        assert!(s.has_critical_error());
    }

    #[test]
    fn revision_reset_clears_downstream_but_keeps_diagnostics() {
        let mut s = state();
        s.composition = Some(CompositionParams::fallback(&s.request));
        s.arrangement = Some(ArrangementPlan::default());
        s.instrument_tracks
            .push(Track::new("keys", crate::song::TrackCategory::Chords));
        s.push_error(StageId::Review, "missing required field: lyrics");
        s.review_notes.push("needs a stronger hook".to_string());

        s.reset_for_revision();

        assert!(s.composition.is_none());
        assert!(s.arrangement.is_none());
        assert!(s.instrument_tracks.is_empty());
        assert!(!s.ready_for_export);
        assert_eq!(s.errors.len(), 1);
        assert_eq!(s.review_notes.len(), 1);
    }

    #[test]
    fn wants_vocals_respects_instrumental_flag() {
        let mut req = SongRequest::new("idea");
        assert!(req.wants_vocals());
        req.is_instrumental = true;
        assert!(!req.wants_vocals());
        req.is_instrumental = false;
        req.lyrics_option = LyricsOption::None;
        assert!(!req.wants_vocals());
    }

    #[test]
    fn fallback_honors_requested_key() {
        let mut req = SongRequest::new("idea");
        assert_eq!(CompositionParams::fallback(&req).key, "C");
        req.key = Some("F#m".to_string());
        assert_eq!(CompositionParams::fallback(&req).key, "F#m");
    }
}
