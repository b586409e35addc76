//! Unified error types for the songforge engine
//!
//! Two categories cross the engine boundary: `Timeout` and `SystemError`,
//! surfaced to callers as a [`FailureResult`]. Everything else (malformed
//! generation output, unavailable resource references, provider hiccups)
//! is recovered inside the owning stage and recorded as a diagnostic
//! string on the shared state; those never become a `SongforgeError`.

use serde::Serialize;
use thiserror::Error;

use crate::state::PartialState;

/// Errors raised by engine-level machinery.
///
/// A stage returning one of these aborts the whole run; content-generation
/// problems must not be reported this way.
#[derive(Error, Debug)]
pub enum SongforgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Engine fault: {0}")]
    Engine(String),
}

pub type Result<T> = std::result::Result<T, SongforgeError>;

/// Discriminates the two unrecoverable outcomes of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The overall wall-clock deadline elapsed before the graph reached
    /// its terminal stage.
    Timeout,
    /// A programming or graph-configuration fault escaped a stage.
    SystemError,
}

/// Returned to the caller when a run cannot produce an export-ready song.
///
/// Carries every diagnostic accumulated so far plus whatever per-stage
/// outputs were populated before the run aborted.
#[derive(Debug, Serialize)]
pub struct FailureResult {
    pub kind: FailureKind,
    pub errors: Vec<String>,
    pub partial: PartialState,
    pub elapsed_ms: u64,
}

impl FailureResult {
    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

impl std::fmt::Display for FailureResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::Timeout => write!(
                f,
                "generation timed out after {} ms ({} diagnostics)",
                self.elapsed_ms,
                self.errors.len()
            ),
            FailureKind::SystemError => write!(
                f,
                "generation aborted by engine fault ({} diagnostics)",
                self.errors.len()
            ),
        }
    }
}
