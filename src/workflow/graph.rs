//! Transition table and branch decisions
//!
//! The only cycle in the graph is Review -> Composer, and it is finite:
//! `review_decision` refuses to revise once `revision_count` reaches
//! `max_revisions`, and the counter only ever increases.

use tracing::debug;

use super::{Next, ReviewDecision, StageId, VocalDecision};
use crate::state::{Recommendation, SharedState, SongRequest, CRITICAL_MARKERS};

/// The fixed successor table. Branch points delegate to the decision
/// functions below; `review_decision` is the only transition that
/// mutates state (it owns the revision counter).
pub fn successor(current: StageId, state: &mut SharedState) -> Next {
    match current {
        StageId::Composer => Next::Stage(StageId::Arrangement),
        StageId::Arrangement => Next::Stage(StageId::Lyrics),
        StageId::Lyrics => match vocal_decision(&state.request) {
            VocalDecision::SkipVocal => Next::Stage(StageId::Instrument),
            VocalDecision::IncludeVocal => Next::Stage(StageId::Vocal),
        },
        StageId::Vocal => Next::Stage(StageId::Instrument),
        StageId::Instrument => Next::Stage(StageId::Effects),
        StageId::Effects => Next::Stage(StageId::Review),
        StageId::Review => match review_decision(state) {
            ReviewDecision::Revise => Next::Stage(StageId::Composer),
            ReviewDecision::Continue => Next::Stage(StageId::Design),
        },
        StageId::Design => Next::Stage(StageId::Qa),
        StageId::Qa => Next::Terminal,
    }
}

/// Pure function of the request: instrumental songs skip the Vocal
/// stage entirely.
pub fn vocal_decision(request: &SongRequest) -> VocalDecision {
    if request.is_instrumental {
        VocalDecision::SkipVocal
    } else {
        VocalDecision::IncludeVocal
    }
}

/// Decides whether the graph loops back to the Composer stage.
///
/// A "revise" recommendation alone is not
/// enough: at least one recorded error must carry a critical marker,
/// and the revision cap must not be exhausted. Returning `Revise`
/// increments `revision_count`.
pub fn review_decision(state: &mut SharedState) -> ReviewDecision {
    if state.revision_count >= state.max_revisions {
        debug!(
            revisions = state.revision_count,
            "revision cap reached, forcing continue"
        );
        return ReviewDecision::Continue;
    }

    let wants_revision = state
        .review
        .as_ref()
        .is_some_and(|r| r.recommendation == Recommendation::Revise);
    if !wants_revision {
        return ReviewDecision::Continue;
    }

    let critical = state
        .errors
        .iter()
        .find(|e| CRITICAL_MARKERS.iter().any(|m| e.contains(m)));
    match critical {
        Some(reason) => {
            debug!(%reason, "entering revision");
            state.revision_count += 1;
            ReviewDecision::Revise
        }
        None => {
            debug!("revise recommended without a critical error, ignoring");
            ReviewDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceRegistries;
    use crate::state::ReviewOutcome;
    use std::sync::Arc;

    fn state_with(is_instrumental: bool) -> SharedState {
        let mut request = SongRequest::new("test");
        request.is_instrumental = is_instrumental;
        SharedState::new(request, Arc::new(ResourceRegistries::builtin()))
    }

    fn reviewed(state: &mut SharedState, recommendation: Recommendation) {
        state.review = Some(ReviewOutcome {
            recommendation,
            notes: vec![],
        });
    }

    #[test]
    fn vocal_decision_is_pure_in_the_request() {
        let instrumental = SongRequest {
            is_instrumental: true,
            ..SongRequest::new("beat")
        };
        assert_eq!(vocal_decision(&instrumental), VocalDecision::SkipVocal);
        assert_eq!(
            vocal_decision(&SongRequest::new("ballad")),
            VocalDecision::IncludeVocal
        );
    }

    #[test]
    fn lyrics_routes_past_vocal_for_instrumentals() {
        let mut state = state_with(true);
        assert_eq!(
            successor(StageId::Lyrics, &mut state),
            Next::Stage(StageId::Instrument)
        );
        let mut state = state_with(false);
        assert_eq!(
            successor(StageId::Lyrics, &mut state),
            Next::Stage(StageId::Vocal)
        );
    }

    #[test]
    fn review_without_recommendation_continues() {
        let mut state = state_with(false);
        assert_eq!(review_decision(&mut state), ReviewDecision::Continue);
        assert_eq!(state.revision_count, 0);
    }

    #[test]
    fn revise_without_critical_error_is_ignored() {
        let mut state = state_with(false);
        reviewed(&mut state, Recommendation::Revise);
        state.push_error(StageId::Lyrics, "rhyme scheme feels forced");
        assert_eq!(review_decision(&mut state), ReviewDecision::Continue);
        assert_eq!(state.revision_count, 0);
    }

    #[test]
    fn revise_with_critical_error_loops_once() {
        let mut state = state_with(false);
        reviewed(&mut state, Recommendation::Revise);
        state.push_error(StageId::Arrangement, "broken structure: zero sections");

        assert_eq!(review_decision(&mut state), ReviewDecision::Revise);
        assert_eq!(state.revision_count, 1);

        // Second pass: cap reached, revise must be refused.
        reviewed(&mut state, Recommendation::Revise);
        assert_eq!(review_decision(&mut state), ReviewDecision::Continue);
        assert_eq!(state.revision_count, 1);
    }

    #[test]
    fn approve_continues_even_with_critical_errors() {
        let mut state = state_with(false);
        reviewed(&mut state, Recommendation::Approve);
        state.push_error(StageId::Composer, "invalid schema: missing tempo");
        assert_eq!(review_decision(&mut state), ReviewDecision::Continue);
    }

    #[test]
    fn graph_reaches_terminal_from_every_stage() {
        // Walk forward from each stage with a non-revising state; every
        // path must hit Terminal within the stage count.
        for start in StageId::ALL {
            let mut state = state_with(false);
            let mut current = start;
            let mut hops = 0;
            loop {
                match successor(current, &mut state) {
                    Next::Terminal => break,
                    Next::Stage(next) => {
                        current = next;
                        hops += 1;
                        assert!(hops <= StageId::ALL.len(), "cycle from {start:?}");
                    }
                }
            }
        }
    }
}
