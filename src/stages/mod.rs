//! The nine generation stages
//!
//! Each stage reads fields written by earlier stages, optionally calls
//! the generation provider, validates what came back against the
//! resource registries, and writes exactly one output field on the
//! shared state. Content and transport failures never escape a stage:
//! the stage records a diagnostic and substitutes its documented
//! fallback. A `SongforgeError` out of `run` means an engine-level
//! fault and aborts the whole run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::generation::GenerationClient;
use crate::song::LyricFragment;
use crate::state::SharedState;
use crate::workflow::StageId;

pub mod arrangement;
pub mod composer;
pub mod design;
pub mod effects;
pub mod instrument;
pub mod lyrics;
pub mod qa;
pub mod review;
pub mod vocal;

pub use arrangement::ArrangementStage;
pub use composer::ComposerStage;
pub use design::DesignStage;
pub use effects::EffectsStage;
pub use instrument::InstrumentStage;
pub use lyrics::LyricsStage;
pub use qa::QaStage;
pub use review::ReviewStage;
pub use vocal::VocalStage;

#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Runs the stage against the shared state. `Err` is reserved for
    /// engine faults; recoverable problems are recorded on the state.
    async fn run(&self, state: &mut SharedState) -> Result<()>;
}

/// Builds the full stage registry the engine drives.
pub fn build_all(client: Arc<dyn GenerationClient>) -> HashMap<StageId, Box<dyn Stage>> {
    let mut stages: HashMap<StageId, Box<dyn Stage>> = HashMap::new();
    stages.insert(
        StageId::Composer,
        Box::new(ComposerStage::new(client.clone())),
    );
    stages.insert(
        StageId::Arrangement,
        Box::new(ArrangementStage::new(client.clone())),
    );
    stages.insert(StageId::Lyrics, Box::new(LyricsStage::new(client.clone())));
    stages.insert(StageId::Vocal, Box::new(VocalStage::new(client.clone())));
    stages.insert(
        StageId::Instrument,
        Box::new(InstrumentStage::new(client.clone())),
    );
    stages.insert(
        StageId::Effects,
        Box::new(EffectsStage::new(client.clone())),
    );
    stages.insert(StageId::Review, Box::new(ReviewStage::new(client.clone())));
    stages.insert(StageId::Design, Box::new(DesignStage::new(client)));
    stages.insert(StageId::Qa, Box::new(QaStage::new()));
    stages
}

/// MIDI root note for a key name ("C", "F#m", "Bb"). Defaults to middle
/// C when the name is unrecognized.
pub(crate) fn midi_root(key: &str) -> u8 {
    let key = key.trim();
    let mut chars = key.chars();
    let letter = chars.next().map(|c| c.to_ascii_uppercase());
    let base: i16 = match letter {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return 60,
    };
    let accidental: i16 = match chars.next() {
        Some('#') => 1,
        Some('b') => -1,
        _ => 0,
    };
    (60 + (base + accidental).rem_euclid(12)) as u8
}

/// Distributes lyric lines over a melody, producing one fragment per
/// line. Notes cycle through `melody`; each note lasts half a beat at
/// the given tempo.
pub(crate) fn build_fragments(lines: &[String], melody: &[u8], tempo: f64) -> Vec<LyricFragment> {
    let tempo = if tempo > 0.0 { tempo } else { 120.0 };
    let note_len = 60.0 / tempo / 2.0;
    let melody: Vec<u8> = if melody.is_empty() {
        vec![60, 62, 64, 65, 67]
    } else {
        melody.to_vec()
    };

    let mut fragments = Vec::with_capacity(lines.len());
    let mut offset = 0.0;
    let mut melody_pos = 0;
    for line in lines {
        let words = line.split_whitespace().count().max(1);
        let notes: Vec<u8> = (0..words)
            .map(|_| {
                let n = melody[melody_pos % melody.len()];
                melody_pos += 1;
                n
            })
            .collect();
        let durations = vec![note_len; notes.len()];
        let span = note_len * notes.len() as f64;
        fragments.push(LyricFragment {
            text: line.clone(),
            notes,
            start_offset: offset,
            durations,
            syllables: None,
        });
        // Half a beat of air between lines.
        offset += span + note_len;
    }
    fragments
}
