//! Progress reporting for generation runs
//!
//! The engine notifies a [`ProgressReporter`] once at the start of every
//! stage with a human-readable message, a fixed completion percentage,
//! and the stage id. Percentages are non-decreasing across a run except
//! when a revision loops the graph back to the Composer stage.

use tracing::info;

pub trait ProgressReporter: Send + Sync {
    fn report(&self, message: &str, percent: u8, stage_id: &str);
}

/// Logs progress through `tracing`.
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn report(&self, message: &str, percent: u8, stage_id: &str) {
        info!(stage = stage_id, percent, "{message}");
    }
}

/// Discards progress notifications.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&self, _message: &str, _percent: u8, _stage_id: &str) {}
}

/// Forwards progress to an arbitrary closure, for callers that bridge
/// the engine into their own UI.
pub struct CallbackReporter<F>
where
    F: Fn(&str, u8, &str) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackReporter<F>
where
    F: Fn(&str, u8, &str) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for CallbackReporter<F>
where
    F: Fn(&str, u8, &str) + Send + Sync,
{
    fn report(&self, message: &str, percent: u8, stage_id: &str) {
        (self.callback)(message, percent, stage_id);
    }
}
