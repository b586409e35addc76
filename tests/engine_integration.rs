//! End-to-end tests of the generation engine against a scripted
//! provider: branch behavior, revision bounding, degradation, pruning,
//! progress reporting, and the deadline.

use std::sync::Arc;
use std::time::Duration;

use songforge::config::GenerationConfig;
use songforge::error::FailureKind;
use songforge::registry::ResourceRegistries;
use songforge::song::TrackCategory;
use songforge::state::{LyricsOption, SongRequest};
use songforge::testing::mocks::{MockGenerationClient, MockGenerationClientBuilder, RecordingReporter};
use songforge::workflow::Engine;

const COMPOSER_JSON: &str =
    r#"{"tempo": 100, "key": "G", "time_signature": "4/4", "duration_secs": 70}"#;

const ARRANGEMENT_JSON: &str = r#"{"sections": [
    {"name": "verse", "start": 0, "duration": 40, "energy": 0.5},
    {"name": "chorus", "start": 40, "duration": 30, "energy": 0.8}
]}"#;

const BROKEN_ARRANGEMENT_JSON: &str = r#"{"sections": [
    {"name": "verse", "start": 0, "duration": 60, "energy": 0.5},
    {"name": "chorus", "start": 30, "duration": 30, "energy": 0.8}
]}"#;

const LYRICS_JSON: &str = r#"{"sections": [
    {"section": "verse", "lines": ["rain on the window", "lights going down"]},
    {"section": "chorus", "lines": ["hold on to the night"]}
]}"#;

const VOCAL_JSON: &str = r#"{"assignments": [
    {"section": "verse", "voice_id": "aria", "melody": [67, 69, 71]},
    {"section": "chorus", "voice_id": "juno", "melody": [74, 72, 71]}
]}"#;

const INSTRUMENT_JSON: &str = r#"{"tracks": [
    {"name": "keys", "category": "chords", "instrument": "piano",
     "clips": [{"start": 0, "duration": 40, "volume": 0.7, "pitches": [55, 59, 62]},
               {"start": 40, "duration": 30, "volume": 0.8, "pitches": [55, 59, 62]}]},
    {"name": "low end", "category": "bass", "instrument": "electric-bass",
     "clips": [{"start": 0, "duration": 70, "volume": 0.9, "pitches": [43]}]}
]}"#;

const EFFECTS_JSON: &str = r#"{"tracks": {
    "keys": {"reverb": 0.4, "delay": 0.2, "pitchShift": 0},
    "low end": {"reverb": 0.1}
}}"#;

const APPROVE_JSON: &str = r#"{"recommendation": "approve", "notes": ["solid draft"]}"#;
const REVISE_JSON: &str = r#"{"recommendation": "revise", "notes": ["structure is off"]}"#;

fn happy_builder() -> MockGenerationClientBuilder {
    MockGenerationClient::builder()
        .with_success("composition parameters", COMPOSER_JSON)
        .with_success("arrangement plan", ARRANGEMENT_JSON)
        .with_success("lyric sheet", LYRICS_JSON)
        .with_success("vocal assignments", VOCAL_JSON)
        .with_success("instrument tracks", INSTRUMENT_JSON)
        .with_success("effect settings", EFFECTS_JSON)
        .with_success("Review the draft", APPROVE_JSON)
}

fn engine_with(client: MockGenerationClient, reporter: Arc<RecordingReporter>) -> Engine {
    Engine::new(Arc::new(client), reporter, &GenerationConfig::default())
}

#[tokio::test]
async fn instrumental_request_skips_the_vocal_stage() {
    let reporter = Arc::new(RecordingReporter::new());
    let mut request = SongRequest::new("chill lofi beat");
    request.is_instrumental = true;
    let engine = engine_with(happy_builder().build(), reporter.clone());

    let song = engine
        .generate(request, Arc::new(ResourceRegistries::builtin()))
        .await
        .expect("run should complete");

    assert_eq!(song.tracks_in(TrackCategory::Vocal).count(), 0);

    let stage_ids = reporter.stage_ids();
    assert!(!stage_ids.contains(&"vocal".to_string()));
    // 8 of 9 stages plus the completion notification.
    assert_eq!(stage_ids.len(), 9);
    assert_eq!(stage_ids.last().map(String::as_str), Some("complete"));
}

#[tokio::test]
async fn vocal_request_produces_a_voiced_vocal_track() {
    let reporter = Arc::new(RecordingReporter::new());
    let mut request = SongRequest::new("a song about rain");
    request.lyrics_option = LyricsOption::Auto;
    let engine = engine_with(happy_builder().build(), reporter.clone());

    let song = engine
        .generate(request, Arc::new(ResourceRegistries::builtin()))
        .await
        .expect("run should complete");

    let vocal_tracks: Vec<_> = song.tracks_in(TrackCategory::Vocal).collect();
    assert!(!vocal_tracks.is_empty());
    let clip = &vocal_tracks[0].clips[0];
    assert!(!clip.voices.is_empty());
    assert!(!clip.voices[0].fragments.is_empty());

    assert!(reporter.stage_ids().contains(&"vocal".to_string()));
}

#[tokio::test]
async fn progress_percentages_are_monotonic_in_a_straight_run() {
    let reporter = Arc::new(RecordingReporter::new());
    let engine = engine_with(happy_builder().build(), reporter.clone());

    engine
        .generate(
            SongRequest::new("steady climb"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect("run should complete");

    let percents = reporter.percents();
    assert_eq!(percents, vec![15, 25, 35, 45, 55, 66, 77, 88, 95, 100]);
}

#[tokio::test]
async fn all_exported_effects_are_within_schema_ranges() {
    let reporter = Arc::new(RecordingReporter::new());
    // Script deliberately out-of-range effect values.
    let client = happy_builder()
        .with_success(
            "effect settings",
            r#"{"tracks": {"keys": {"reverb": 3.0, "bitcrush": -1.0, "pitchShift": 99}}}"#,
        )
        .build();
    let engine = engine_with(client, reporter);

    let song = engine
        .generate(
            SongRequest::new("crushed"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect("run should complete");

    for track in &song.tracks {
        for clip in &track.clips {
            assert!(clip.effects.in_range(), "clip effects out of range");
            assert!((0.0..=1.0).contains(&clip.volume));
            assert!(clip.start >= 0.0);
            assert!(clip.duration > 0.0);
        }
    }
}

#[tokio::test]
async fn malformed_composer_output_degrades_to_documented_fallback() {
    let reporter = Arc::new(RecordingReporter::new());
    let client = happy_builder()
        .with_success("composition parameters", "let me think about that...")
        .build();
    let engine = engine_with(client, reporter);

    let song = engine
        .generate(
            SongRequest::new("fallback check"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect("run should complete despite malformed composer output");

    assert_eq!(song.tempo, 120.0);
    assert_eq!(song.key, "C");
    assert_eq!(song.time_signature.beats, 4);
    assert_eq!(song.time_signature.unit, 4);
    assert_eq!(song.duration, 180.0);
}

#[tokio::test]
async fn unavailable_instruments_never_reach_the_export() {
    let reporter = Arc::new(RecordingReporter::new());
    let client = happy_builder()
        .with_success(
            "instrument tracks",
            r#"{"tracks": [
                {"name": "keys", "category": "chords", "instrument": "piano",
                 "clips": [{"start": 0, "duration": 70, "pitches": [60]}]},
                {"name": "weird", "category": "lead", "instrument": "theremin",
                 "clips": [{"start": 0, "duration": 70, "pitches": [72]}]}
            ]}"#,
        )
        .build();
    let engine = engine_with(client, reporter);

    let song = engine
        .generate(
            SongRequest::new("pruning check"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect("run should complete");

    for track in &song.tracks {
        for clip in &track.clips {
            assert_ne!(clip.instrument, "theremin");
        }
    }
}

#[tokio::test]
async fn critical_error_triggers_exactly_one_revision() {
    let reporter = Arc::new(RecordingReporter::new());
    // Broken arrangement every pass (critical marker) and a reviewer
    // that always wants a revision: the revision bound must stop the
    // loop after one extra pass.
    let client = MockGenerationClient::builder()
        .with_success("composition parameters", COMPOSER_JSON)
        .with_success("arrangement plan", BROKEN_ARRANGEMENT_JSON)
        .with_success("lyric sheet", LYRICS_JSON)
        .with_success("vocal assignments", VOCAL_JSON)
        .with_success("instrument tracks", INSTRUMENT_JSON)
        .with_success("effect settings", EFFECTS_JSON)
        .with_success("Review the draft", REVISE_JSON)
        .build();
    let engine = engine_with(client, reporter.clone());

    let song = engine
        .generate(
            SongRequest::new("revision check"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect("run should complete after the bounded revision");

    assert!(!song.tracks.is_empty());

    let stage_ids = reporter.stage_ids();
    let composer_runs = stage_ids.iter().filter(|s| s.as_str() == "composer").count();
    assert_eq!(composer_runs, 2, "composer must run exactly twice");
    let review_runs = stage_ids.iter().filter(|s| s.as_str() == "review").count();
    assert_eq!(review_runs, 2);
    // Design and QA only run once, after the second review.
    assert_eq!(stage_ids.iter().filter(|s| s.as_str() == "design").count(), 1);
    assert_eq!(stage_ids.iter().filter(|s| s.as_str() == "qa").count(), 1);
}

#[tokio::test]
async fn revise_recommendation_without_critical_error_is_ignored() {
    let reporter = Arc::new(RecordingReporter::new());
    let client = happy_builder()
        .with_success("Review the draft", REVISE_JSON)
        .build();
    let engine = engine_with(client, reporter.clone());

    engine
        .generate(
            SongRequest::new("conservative check"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect("run should complete without revising");

    let stage_ids = reporter.stage_ids();
    let composer_runs = stage_ids.iter().filter(|s| s.as_str() == "composer").count();
    assert_eq!(composer_runs, 1, "no critical error, so no revision");
}

#[tokio::test]
async fn hung_provider_hits_the_deadline_instead_of_waiting_forever() {
    let reporter = Arc::new(RecordingReporter::new());
    let client = MockGenerationClient::builder().never_resolving().build();
    let engine = engine_with(client, reporter)
        .with_deadline(Duration::from_millis(20));

    let failure = engine
        .generate(
            SongRequest::new("stuck"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect_err("run must time out");

    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(failure
        .errors
        .iter()
        .any(|e| e.contains("deadline exceeded")));
}

#[tokio::test]
async fn missing_stage_implementation_is_a_system_error() {
    let reporter = Arc::new(RecordingReporter::new());
    let client: Arc<dyn songforge::generation::GenerationClient> =
        Arc::new(happy_builder().build());
    let mut stages = songforge::stages::build_all(client);
    stages.remove(&songforge::StageId::Qa);
    let engine = Engine::from_stages(stages, reporter, Duration::from_secs(60));

    let failure = engine
        .generate(
            SongRequest::new("broken engine"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect_err("run must fail");

    assert_eq!(failure.kind, FailureKind::SystemError);
    assert!(failure.partial.composition.is_some(), "partial state kept");
    assert!(failure.errors.iter().any(|e| e.contains("qa")));
}

#[tokio::test]
async fn partial_state_accompanies_a_timeout() {
    let reporter = Arc::new(RecordingReporter::new());
    let client = MockGenerationClient::builder().never_resolving().build();
    let engine = engine_with(client, reporter).with_deadline(Duration::from_millis(10));

    let failure = engine
        .generate(
            SongRequest::new("partial"),
            Arc::new(ResourceRegistries::builtin()),
        )
        .await
        .expect_err("run must time out");

    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.partial.last_stage, songforge::StageId::Composer);
    assert_eq!(failure.partial.revision_count, 0);
}
