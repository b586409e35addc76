//! The generation engine
//!
//! Owns the shared state for one run and drives the workflow graph from
//! the Composer stage to the terminal QA stage. Exactly two failure
//! paths cross this boundary: deadline expiry and engine faults; every
//! content-level problem is absorbed by the stages themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use super::{graph, Next, StageId};
use crate::config::GenerationConfig;
use crate::error::{FailureKind, FailureResult};
use crate::generation::GenerationClient;
use crate::progress::ProgressReporter;
use crate::registry::ResourceRegistries;
use crate::song::SongDescription;
use crate::stages::{self, Stage};
use crate::state::{PartialState, SharedState, SongRequest};

pub struct Engine {
    stages: HashMap<StageId, Box<dyn Stage>>,
    reporter: Arc<dyn ProgressReporter>,
    deadline: std::time::Duration,
}

impl Engine {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        reporter: Arc<dyn ProgressReporter>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            stages: stages::build_all(client),
            reporter,
            deadline: config.deadline(),
        }
    }

    /// Builds an engine from an explicit stage set, for embedders that
    /// substitute their own stage implementations.
    pub fn from_stages(
        stages: HashMap<StageId, Box<dyn Stage>>,
        reporter: Arc<dyn ProgressReporter>,
        deadline: std::time::Duration,
    ) -> Self {
        Self {
            stages,
            reporter,
            deadline,
        }
    }

    /// Overrides the overall run deadline.
    pub fn with_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs the full workflow for one request.
    ///
    /// Returns the export-ready song, or a [`FailureResult`] carrying
    /// the failure kind, all accumulated diagnostics, and whatever
    /// partial state existed when the run aborted.
    pub async fn generate(
        &self,
        request: SongRequest,
        registries: Arc<ResourceRegistries>,
    ) -> Result<SongDescription, FailureResult> {
        let started = Instant::now();
        let mut state = SharedState::new(request, registries);
        info!(idea = %state.request.song_idea, "starting generation run");

        loop {
            let stage_id = state.current_stage;
            let Some(stage) = self.stages.get(&stage_id) else {
                error!(stage = %stage_id, "no implementation registered");
                state.errors.push(format!(
                    "engine: no implementation registered for stage '{stage_id}'"
                ));
                return Err(self.failure(FailureKind::SystemError, &state, started));
            };

            self.reporter
                .report(stage_id.message(), stage_id.percent(), stage_id.as_str());

            let Some(remaining) = self.deadline.checked_sub(started.elapsed()) else {
                return Err(self.failure(FailureKind::Timeout, &state, started));
            };

            let stage_started = Instant::now();
            match tokio::time::timeout(remaining, stage.run(&mut state)).await {
                Err(_elapsed) => {
                    // Dropping the stage future cancels any in-flight
                    // provider call.
                    state.errors.push(format!(
                        "engine: deadline exceeded while running stage '{stage_id}'"
                    ));
                    return Err(self.failure(FailureKind::Timeout, &state, started));
                }
                Ok(Err(e)) => {
                    error!(stage = %stage_id, "engine fault: {e}");
                    state.errors.push(format!("engine: stage '{stage_id}' fault: {e}"));
                    return Err(self.failure(FailureKind::SystemError, &state, started));
                }
                Ok(Ok(())) => {
                    debug!(
                        stage = %stage_id,
                        elapsed_ms = stage_started.elapsed().as_millis() as u64,
                        "stage completed"
                    );
                }
            }

            match graph::successor(stage_id, &mut state) {
                Next::Terminal => break,
                Next::Stage(next) => {
                    if stage_id == StageId::Review && next == StageId::Composer {
                        // Entering a revision: recompute everything
                        // downstream instead of risking stale output.
                        state.reset_for_revision();
                        info!(revision = state.revision_count, "looping back to composer");
                    }
                    state.current_stage = next;
                }
            }
        }

        self.reporter.report("Song ready for export", 100, "complete");

        match state.song.take() {
            Some(song) if state.ready_for_export => {
                info!(
                    tracks = song.tracks.len(),
                    errors = state.errors.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation run completed"
                );
                Ok(song)
            }
            _ => {
                state
                    .errors
                    .push("engine: terminal stage finished without an export-ready song".to_string());
                Err(self.failure(FailureKind::SystemError, &state, started))
            }
        }
    }

    fn failure(&self, kind: FailureKind, state: &SharedState, started: Instant) -> FailureResult {
        FailureResult {
            kind,
            errors: state.errors.clone(),
            partial: PartialState::capture(state),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}
