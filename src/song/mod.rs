//! Export schema for a fully specified song
//!
//! A [`SongDescription`] is the terminal artifact of a generation run:
//! a set of tracks, each holding clips positioned on a timeline in
//! seconds. The types here mirror the exchange format consumed by the
//! timeline renderer and audio engine, so field names and value ranges
//! are part of the contract; see [`ClipEffects::clamp`] for the range
//! normalization the QA stage applies before export.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semitone bounds for pitch shifting.
pub const PITCH_SHIFT_MIN: f64 = -12.0;
pub const PITCH_SHIFT_MAX: f64 = 12.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongDescription {
    pub id: Uuid,
    pub title: String,
    pub tempo: f64,
    pub key: String,
    pub time_signature: TimeSignature,
    /// Total length in seconds.
    pub duration: f64,
    pub tracks: Vec<Track>,
    /// Reference (URL or asset id) to the generated album art, if any.
    pub album_art: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SongDescription {
    /// All tracks in the given category.
    pub fn tracks_in(&self, category: TrackCategory) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.category == category)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats: u8,
    pub unit: u8,
}

impl TimeSignature {
    pub const COMMON: TimeSignature = TimeSignature { beats: 4, unit: 4 };

    /// Parses "4/4"-style notation.
    pub fn parse(s: &str) -> Option<Self> {
        let (beats, unit) = s.split_once('/')?;
        let beats: u8 = beats.trim().parse().ok()?;
        let unit: u8 = unit.trim().parse().ok()?;
        if beats == 0 || unit == 0 {
            return None;
        }
        Some(TimeSignature { beats, unit })
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.beats, self.unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackCategory {
    Vocal,
    Chords,
    Bass,
    Drums,
    Lead,
    Pad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    pub category: TrackCategory,
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(name: impl Into<String>, category: TrackCategory) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category,
            clips: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Note,
    Lyrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub id: Uuid,
    pub track_id: Uuid,
    /// Seconds from song start; never negative.
    pub start: f64,
    /// Seconds; always positive in an exported song.
    pub duration: f64,
    #[serde(rename = "type")]
    pub kind: ClipKind,
    pub instrument: String,
    /// Linear gain in [0, 1].
    pub volume: f64,
    pub effects: ClipEffects,
    /// Note content for `Note` clips.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    /// Voice content for `Lyrics` clips.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub voices: Vec<VoicePart>,
}

impl Clip {
    pub fn note(track_id: Uuid, instrument: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id,
            start,
            duration,
            kind: ClipKind::Note,
            instrument: instrument.into(),
            volume: 0.8,
            effects: ClipEffects::neutral(),
            notes: Vec::new(),
            voices: Vec::new(),
        }
    }

    pub fn lyrics(track_id: Uuid, start: f64, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id,
            start,
            duration,
            kind: ClipKind::Lyrics,
            instrument: "voice".to_string(),
            volume: 0.9,
            effects: ClipEffects::neutral(),
            notes: Vec::new(),
            voices: Vec::new(),
        }
    }
}

/// One note inside a `Note` clip; `start` is relative to the clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// MIDI note number.
    pub pitch: u8,
    pub start: f64,
    pub duration: f64,
}

/// Per-clip effect sends. All sends live in [0, 1]; `pitch_shift` is in
/// semitones within [-12, 12]. Serialized keys match the renderer schema
/// exactly, including the camel-cased `pitchShift`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipEffects {
    pub reverb: f64,
    pub delay: f64,
    pub distortion: f64,
    pub chorus: f64,
    pub filter: f64,
    pub bitcrush: f64,
    #[serde(rename = "pitchShift")]
    pub pitch_shift: f64,
}

impl ClipEffects {
    pub fn neutral() -> Self {
        Self {
            reverb: 0.0,
            delay: 0.0,
            distortion: 0.0,
            chorus: 0.0,
            filter: 0.0,
            bitcrush: 0.0,
            pitch_shift: 0.0,
        }
    }

    /// Forces every field into its documented range. Non-finite values
    /// collapse to the neutral setting for that field.
    pub fn clamp(&mut self) {
        for send in [
            &mut self.reverb,
            &mut self.delay,
            &mut self.distortion,
            &mut self.chorus,
            &mut self.filter,
            &mut self.bitcrush,
        ] {
            *send = if send.is_finite() {
                send.clamp(0.0, 1.0)
            } else {
                0.0
            };
        }
        self.pitch_shift = if self.pitch_shift.is_finite() {
            self.pitch_shift.clamp(PITCH_SHIFT_MIN, PITCH_SHIFT_MAX)
        } else {
            0.0
        };
    }

    pub fn clamped(mut self) -> Self {
        self.clamp();
        self
    }

    /// True when every field already sits inside its documented range.
    pub fn in_range(&self) -> bool {
        let sends_ok = [
            self.reverb,
            self.delay,
            self.distortion,
            self.chorus,
            self.filter,
            self.bitcrush,
        ]
        .iter()
        .all(|v| (0.0..=1.0).contains(v));
        sends_ok && (PITCH_SHIFT_MIN..=PITCH_SHIFT_MAX).contains(&self.pitch_shift)
    }
}

impl Default for ClipEffects {
    fn default() -> Self {
        Self::neutral()
    }
}

/// One voice's contribution to a lyrics clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicePart {
    pub voice_id: String,
    pub fragments: Vec<LyricFragment>,
}

/// A singable fragment: a run of text with its melody.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricFragment {
    pub text: String,
    /// MIDI note numbers, one per sung syllable/word.
    pub notes: Vec<u8>,
    /// Seconds from the start of the enclosing clip.
    pub start_offset: f64,
    /// Per-note durations in seconds; same length as `notes`.
    pub durations: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syllables: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_signature_parses_common_forms() {
        assert_eq!(TimeSignature::parse("4/4"), Some(TimeSignature::COMMON));
        assert_eq!(
            TimeSignature::parse("3/4"),
            Some(TimeSignature { beats: 3, unit: 4 })
        );
        assert_eq!(TimeSignature::parse("0/4"), None);
        assert_eq!(TimeSignature::parse("waltz"), None);
    }

    #[test]
    fn clamp_forces_documented_ranges() {
        let mut fx = ClipEffects {
            reverb: 1.7,
            delay: -0.4,
            distortion: 0.5,
            chorus: f64::NAN,
            filter: 0.0,
            bitcrush: 2.0,
            pitch_shift: -30.0,
        };
        fx.clamp();
        assert!(fx.in_range());
        assert_eq!(fx.reverb, 1.0);
        assert_eq!(fx.delay, 0.0);
        assert_eq!(fx.distortion, 0.5);
        assert_eq!(fx.chorus, 0.0);
        assert_eq!(fx.pitch_shift, -12.0);
    }

    #[test]
    fn effects_serialize_with_renderer_keys() {
        let json = serde_json::to_value(ClipEffects::neutral()).unwrap();
        let obj = json.as_object().unwrap();
        for key in ["reverb", "delay", "distortion", "chorus", "filter", "bitcrush", "pitchShift"] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert_eq!(obj.len(), 7);
    }
}
