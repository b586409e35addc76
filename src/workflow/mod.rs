//! Workflow graph types
//!
//! The generation pipeline is a fixed directed graph over a closed set
//! of stages. Successors are bound through a typed transition table in
//! [`graph`], and the two branch points are pure decision functions.
//! There is no string-keyed lookup anywhere in the traversal, so an
//! "unknown stage" cannot exist at runtime.

use serde::{Deserialize, Serialize};

pub mod engine;
pub mod graph;

pub use engine::Engine;
pub use graph::{review_decision, successor, vocal_decision};

/// Closed identifier set for the nine workflow stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Composer,
    Arrangement,
    Lyrics,
    Vocal,
    Instrument,
    Effects,
    Review,
    Design,
    Qa,
}

impl StageId {
    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Composer => "composer",
            StageId::Arrangement => "arrangement",
            StageId::Lyrics => "lyrics",
            StageId::Vocal => "vocal",
            StageId::Instrument => "instrument",
            StageId::Effects => "effects",
            StageId::Review => "review",
            StageId::Design => "design",
            StageId::Qa => "qa",
        }
    }

    /// Fixed completion percentage reported when this stage starts.
    pub fn percent(self) -> u8 {
        match self {
            StageId::Composer => 15,
            StageId::Arrangement => 25,
            StageId::Lyrics => 35,
            StageId::Vocal => 45,
            StageId::Instrument => 55,
            StageId::Effects => 66,
            StageId::Review => 77,
            StageId::Design => 88,
            StageId::Qa => 95,
        }
    }

    /// Human-readable progress message for this stage.
    pub fn message(self) -> &'static str {
        match self {
            StageId::Composer => "Sketching global musical parameters",
            StageId::Arrangement => "Planning song sections",
            StageId::Lyrics => "Writing lyrics",
            StageId::Vocal => "Assigning voices and melodies",
            StageId::Instrument => "Composing instrumental tracks",
            StageId::Effects => "Dialing in effects",
            StageId::Review => "Reviewing the draft",
            StageId::Design => "Designing album art",
            StageId::Qa => "Assembling the final song",
        }
    }

    pub const ALL: [StageId; 9] = [
        StageId::Composer,
        StageId::Arrangement,
        StageId::Lyrics,
        StageId::Vocal,
        StageId::Instrument,
        StageId::Effects,
        StageId::Review,
        StageId::Design,
        StageId::Qa,
    ];
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the graph says comes after the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Stage(StageId),
    Terminal,
}

/// Outcome of the lyrics branch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocalDecision {
    SkipVocal,
    IncludeVocal,
}

/// Outcome of the review branch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Revise,
    Continue,
}
