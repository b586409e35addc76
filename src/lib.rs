//! # Songforge
//!
//! An AI song-composition workflow engine. A generation request is
//! driven through a fixed graph of nine specialized stages (Composer,
//! Arrangement, Lyrics, Vocal, Instrument, Effects, Review, Design,
//! QA) with two conditional branch points, a bounded revision loop,
//! per-stage failure isolation, and an overall run deadline. The result
//! is either an export-ready [`song::SongDescription`] or a structured
//! [`error::FailureResult`].
//!
//! ## Modules
//!
//! - `cli` - Command-line argument structures and command routing
//! - `config` - Generation configuration (deadline, provider, model)
//! - `error` - Crate error type and the two unrecoverable failure kinds
//! - `generation` - Provider trait seam and the HTTP client
//! - `progress` - Progress reporting contract and default sinks
//! - `registry` - Read-only instrument/sample/voice snapshots
//! - `song` - The export schema (tracks, clips, effects, voices)
//! - `stages` - The nine stage implementations
//! - `state` - The shared state threaded through a run
//! - `testing` - Mock provider and progress recorder
//! - `workflow` - Stage graph, decision functions, and the engine

pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod progress;
pub mod registry;
pub mod song;
pub mod stages;
pub mod state;
pub mod testing;
pub mod workflow;

pub use error::{FailureKind, FailureResult, SongforgeError};
pub use registry::ResourceRegistries;
pub use song::SongDescription;
pub use state::{SharedState, SongRequest};
pub use workflow::{Engine, StageId};
