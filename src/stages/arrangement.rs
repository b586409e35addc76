//! Arrangement stage: section plan
//!
//! Splits the song into named sections on the timeline. A structurally
//! broken plan (no sections, non-positive durations, overlaps) is
//! recorded with the critical `broken structure` marker, the one error
//! class this stage can produce that justifies a revision, and the
//! fixed fallback plan is substituted.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::Stage;
use crate::error::Result;
use crate::generation::{parse_payload, GenerationClient};
use crate::state::{ArrangementPlan, CompositionParams, Section, SharedState};
use crate::workflow::StageId;

/// Tolerated section overlap in seconds, to absorb float noise in
/// generated timelines.
const OVERLAP_EPSILON: f64 = 0.05;

pub struct ArrangementStage {
    client: Arc<dyn GenerationClient>,
}

impl ArrangementStage {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }

    fn build_prompt(&self, state: &SharedState, composition: &CompositionParams) -> String {
        let mut prompt = String::from(
            "Produce an arrangement plan for the song as JSON: \
             {\"sections\": [{\"name\": \"intro|verse|chorus|bridge|outro\", \
             \"start\": <seconds>, \"duration\": <seconds>, \"energy\": <0..1>}]}. \
             Sections must be ordered and non-overlapping.\n",
        );
        prompt.push_str(&format!(
            "Song idea: {}\nTempo: {} BPM, key {}, total length {} seconds.\n",
            state.request.song_idea,
            composition.tempo,
            composition.key,
            composition.duration_secs
        ));
        if state.request.is_instrumental {
            prompt.push_str("The song is instrumental; no sung sections are required.\n");
        }
        prompt
    }

    /// Structural validation; returns the reason a plan is unusable.
    fn structural_fault(plan: &ArrangementPlan) -> Option<String> {
        if plan.sections.is_empty() {
            return Some("plan has no sections".to_string());
        }
        for section in &plan.sections {
            if !section.start.is_finite() || section.start < 0.0 {
                return Some(format!("section '{}' has a bad start time", section.name));
            }
            if !section.duration.is_finite() || section.duration <= 0.0 {
                return Some(format!(
                    "section '{}' has a non-positive duration",
                    section.name
                ));
            }
        }
        for pair in plan.sections.windows(2) {
            if pair[0].end() > pair[1].start + OVERLAP_EPSILON {
                return Some(format!(
                    "sections '{}' and '{}' overlap",
                    pair[0].name, pair[1].name
                ));
            }
        }
        None
    }

    /// Fixed fallback plan scaled to the composition's duration.
    pub(crate) fn fallback_plan(duration_secs: f64) -> ArrangementPlan {
        let template: [(&str, f64, f64); 6] = [
            ("intro", 0.10, 0.3),
            ("verse", 0.22, 0.5),
            ("chorus", 0.18, 0.8),
            ("verse", 0.22, 0.55),
            ("chorus", 0.18, 0.85),
            ("outro", 0.10, 0.35),
        ];
        let mut sections = Vec::with_capacity(template.len());
        let mut cursor = 0.0;
        for (name, share, energy) in template {
            let duration = duration_secs * share;
            sections.push(Section {
                name: name.to_string(),
                start: cursor,
                duration,
                energy,
            });
            cursor += duration;
        }
        ArrangementPlan { sections }
    }
}

#[async_trait]
impl Stage for ArrangementStage {
    fn id(&self) -> StageId {
        StageId::Arrangement
    }

    async fn run(&self, state: &mut SharedState) -> Result<()> {
        let composition = state
            .composition
            .clone()
            .unwrap_or_else(|| CompositionParams::fallback(&state.request));
        let prompt = self.build_prompt(state, &composition);

        let plan = match self.client.complete(&prompt).await {
            Ok(raw) => match parse_payload::<ArrangementPayload>(&raw) {
                Ok(payload) => {
                    let mut plan = ArrangementPlan {
                        sections: payload
                            .sections
                            .into_iter()
                            .map(|s| Section {
                                name: s.name.trim().to_ascii_lowercase(),
                                start: s.start,
                                duration: s.duration,
                                energy: if s.energy.is_finite() {
                                    s.energy.clamp(0.0, 1.0)
                                } else {
                                    0.5
                                },
                            })
                            .collect(),
                    };
                    plan.sections
                        .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
                    match Self::structural_fault(&plan) {
                        None => plan,
                        Some(fault) => {
                            state.push_error(
                                StageId::Arrangement,
                                format!("broken structure: {fault}; using fallback plan"),
                            );
                            Self::fallback_plan(composition.duration_secs)
                        }
                    }
                }
                Err(e) => {
                    state.push_error(
                        StageId::Arrangement,
                        format!("{e}; using fallback plan"),
                    );
                    Self::fallback_plan(composition.duration_secs)
                }
            },
            Err(e) => {
                state.push_error(
                    StageId::Arrangement,
                    format!("provider call failed ({e}); using fallback plan"),
                );
                Self::fallback_plan(composition.duration_secs)
            }
        };

        debug!(sections = plan.sections.len(), "arrangement planned");
        state.arrangement = Some(plan);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ArrangementPayload {
    sections: Vec<SectionPayload>,
}

#[derive(Debug, Deserialize)]
struct SectionPayload {
    name: String,
    start: f64,
    duration: f64,
    #[serde(default = "default_energy")]
    energy: f64,
}

fn default_energy() -> f64 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistries;
    use crate::state::SongRequest;

    fn state() -> SharedState {
        let mut s = SharedState::new(
            SongRequest::new("test"),
            Arc::new(ResourceRegistries::builtin()),
        );
        s.composition = Some(CompositionParams::fallback(&s.request));
        s
    }

    fn run_with(response: &str) -> SharedState {
        let client = Arc::new(
            crate::testing::mocks::MockGenerationClient::builder()
                .with_success("arrangement plan", response)
                .build(),
        );
        let mut state = state();
        tokio_test::block_on(ArrangementStage::new(client).run(&mut state)).unwrap();
        state
    }

    #[test]
    fn accepts_ordered_sections() {
        let state = run_with(
            r#"{"sections": [
                {"name": "Intro", "start": 0, "duration": 12, "energy": 0.2},
                {"name": "Verse", "start": 12, "duration": 40, "energy": 0.6},
                {"name": "Chorus", "start": 52, "duration": 30, "energy": 0.9}
            ]}"#,
        );
        let plan = state.arrangement.unwrap();
        assert_eq!(plan.sections.len(), 3);
        assert_eq!(plan.sections[0].name, "intro");
        assert!(state.errors.is_empty());
    }

    #[test]
    fn overlapping_sections_are_a_critical_error() {
        let state = run_with(
            r#"{"sections": [
                {"name": "verse", "start": 0, "duration": 60},
                {"name": "chorus", "start": 30, "duration": 30}
            ]}"#,
        );
        assert!(state.has_critical_error());
        // Fallback plan substituted, still structurally sound.
        let plan = state.arrangement.unwrap();
        assert!(ArrangementStage::structural_fault(&plan).is_none());
    }

    #[test]
    fn empty_plan_is_a_critical_error() {
        let state = run_with(r#"{"sections": []}"#);
        assert!(state.has_critical_error());
        assert!(!state.arrangement.unwrap().sections.is_empty());
    }

    #[test]
    fn fallback_plan_scales_to_duration() {
        let plan = ArrangementStage::fallback_plan(300.0);
        assert!((plan.total_duration() - 300.0).abs() < 1e-6);
        assert!(ArrangementStage::structural_fault(&plan).is_none());
        assert!(plan.sections.iter().any(|s| s.is_singable()));
    }
}
