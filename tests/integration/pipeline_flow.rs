//! Integration tests for the trace pipeline
//!
//! Tests the flow: MockOracle -> TraceOrchestrator -> PlaybackController,
//! driven through TraceSession the way a view would drive it.

use std::sync::Arc;
use std::time::Duration;

use stepwise::narration::{RecordingNarrator, SilentNarrator};
use stepwise::oracle::mock::{MockOracle, MockResponse};
use stepwise::pipeline::{
    DeepRequestOutcome, LiveBlock, LiveUpdateOutcome, OrchestratorUpdate, PlayState,
    SequenceOrigin, SessionEvent, Status,
};
use stepwise::{ResultCache, SavedTrace, SourceId, TraceError};

use super::common::*;

/// Two views of the same file share one cache, so only one oracle call is made
#[tokio::test]
async fn test_views_share_result_cache() {
    let oracle = Arc::new(MockOracle::new().with_fallback(MockResponse::text(BUBBLE_SORT)));
    let cache = Arc::new(ResultCache::new());

    let mut first = session_with(oracle.clone(), Arc::new(SilentNarrator), cache.clone(), "sort.py");
    first.load_code(BUBBLE_SORT_CODE);
    first.run_deep(false);
    match first.settle().await {
        Some(OrchestratorUpdate::Ready { frames }) => assert_eq!(frames.len(), 6),
        other => panic!("Expected Ready, got {:?}", other),
    }

    let mut second = session_with(oracle.clone(), Arc::new(SilentNarrator), cache, "sort.py");
    // Trailing whitespace differences normalize away
    second.load_code("arr = [3, 1, 2]  \r\narr.sort()\r\nprint(arr)");
    assert_eq!(second.run_deep(false), DeepRequestOutcome::CacheHit);

    let view = second.snapshot();
    assert_eq!(view.status, Status::Ready);
    assert_eq!(view.frames.len(), 6);
    assert_eq!(oracle.invocation_count(), 1);
}

/// A second request while the first is still invoking does not start another
#[tokio::test]
async fn test_single_flight_while_invoking() {
    let oracle = Arc::new(
        MockOracle::new().with_fallback(MockResponse::text(BUBBLE_SORT).with_delay(Duration::from_millis(20))),
    );
    let mut session = session_with(
        oracle.clone(),
        Arc::new(SilentNarrator),
        Arc::new(ResultCache::new()),
        "sort.py",
    );
    session.load_code(BUBBLE_SORT_CODE);

    assert!(matches!(session.run_deep(false), DeepRequestOutcome::Started { .. }));
    assert_eq!(session.snapshot().status, Status::Invoking);
    assert_eq!(session.run_deep(false), DeepRequestOutcome::AlreadyInFlight);

    assert!(matches!(session.settle().await, Some(OrchestratorUpdate::Ready { .. })));
    assert_eq!(oracle.invocation_count(), 1);
}

/// Live edits never clobber a long simulated trace
#[tokio::test]
async fn test_live_guess_cannot_replace_simulation() {
    let oracle = Arc::new(MockOracle::new().with_fallback(MockResponse::text(BUBBLE_SORT)));
    let mut session = session_with(
        oracle,
        Arc::new(SilentNarrator),
        Arc::new(ResultCache::new()),
        "sort.py",
    );
    session.load_code(BUBBLE_SORT_CODE);
    session.run_deep(false);
    session.settle().await;

    let outcome = session.live_update("arr = [3, 1, 2]\narr.push(7)");
    assert_eq!(outcome, LiveUpdateOutcome::Blocked(LiveBlock::DeepSequenceActive));

    let state = session.orchestrator().state();
    assert_eq!(state.active.as_ref().map(|a| a.origin), Some(SequenceOrigin::Deep));
    assert_eq!(session.snapshot().frames.len(), 6);
}

/// A truncated oracle response still yields the frames that arrived whole
#[tokio::test]
async fn test_truncated_stream_keeps_complete_frames() {
    let (head, tail) = TRUNCATED.split_at(30);
    let oracle = Arc::new(MockOracle::new().with_fallback(MockResponse::chunks([head, tail])));
    let mut session = session_with(
        oracle,
        Arc::new(SilentNarrator),
        Arc::new(ResultCache::new()),
        "main.py",
    );
    session.load_code("x = 1");
    session.run_deep(false);

    let mut progress = Vec::new();
    let frames = loop {
        match session.step().await {
            SessionEvent::Oracle(OrchestratorUpdate::Progress { received_bytes }) => {
                progress.push(received_bytes)
            }
            SessionEvent::Oracle(OrchestratorUpdate::Ready { frames }) => break frames,
            other => panic!("Unexpected event {:?}", other),
        }
    };

    assert_eq!(progress, vec![30, TRUNCATED.len()]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].description, "start");
}

/// Rate limiting shows a countdown and hides retry until it runs out
#[tokio::test(start_paused = true)]
async fn test_rate_limit_countdown_then_retry() {
    let oracle = Arc::new(
        MockOracle::new()
            .with_response(MockResponse::rate_limited(Some(Duration::from_secs(90))))
            .with_fallback(MockResponse::text(BUBBLE_SORT)),
    );
    let mut session = session_with(
        oracle.clone(),
        Arc::new(SilentNarrator),
        Arc::new(ResultCache::new()),
        "sort.py",
    );
    session.load_code(BUBBLE_SORT_CODE);
    session.run_deep(false);

    match session.settle().await {
        Some(OrchestratorUpdate::Failed(TraceError::RateLimited { cooldown, .. })) => {
            assert_eq!(cooldown, Duration::from_secs(90))
        }
        other => panic!("Expected RateLimited, got {:?}", other),
    }

    let view = session.snapshot();
    assert_eq!(view.status, Status::Error);
    assert!(!view.can_retry);
    assert!(view.cooldown_remaining.is_some_and(|r| r > Duration::from_secs(60)));
    assert!(view.error.is_some_and(|e| e.contains("429")));
    assert!(matches!(
        session.retry(),
        Some(DeepRequestOutcome::CoolingDown { .. })
    ));

    tokio::time::advance(Duration::from_secs(91)).await;
    assert!(session.snapshot().can_retry);
    assert!(matches!(session.retry(), Some(DeepRequestOutcome::Started { .. })));
    assert!(matches!(session.settle().await, Some(OrchestratorUpdate::Ready { .. })));
    assert_eq!(oracle.invocation_count(), 2);
}

/// Switching targets mid-invocation drops the stale result
#[tokio::test(start_paused = true)]
async fn test_switch_target_drops_stale_result() {
    let oracle = Arc::new(
        MockOracle::new()
            .with_fallback(MockResponse::text(BUBBLE_SORT).with_delay(Duration::from_secs(2))),
    );
    let mut session = session_with(
        oracle,
        Arc::new(SilentNarrator),
        Arc::new(ResultCache::new()),
        "sort.py",
    );
    session.load_code(BUBBLE_SORT_CODE);
    session.run_deep(false);

    session.switch_target(SourceId::new("other.py"), "y = 2");
    let waited = tokio::time::timeout(Duration::from_secs(5), session.step()).await;
    assert!(waited.is_err(), "stale invocation produced {:?}", waited);

    let view = session.snapshot();
    assert_eq!(view.status, Status::Idle);
    assert_eq!(view.source_id, Some(SourceId::new("other.py")));
    assert!(view.frames.is_empty());
}

/// Narrated playback is cut off before a new simulation is adopted
#[tokio::test]
async fn test_new_simulation_silences_old_narration() {
    let oracle = Arc::new(
        MockOracle::new()
            .with_response(MockResponse::text(BUBBLE_SORT))
            .with_response(MockResponse::text(frames_json(2))),
    );
    let narrator = RecordingNarrator::new();
    let mut session = session_with(
        oracle,
        Arc::new(narrator.clone()),
        Arc::new(ResultCache::new()),
        "sort.py",
    );
    session.load_code(BUBBLE_SORT_CODE);
    session.run_deep(false);
    session.settle().await;

    assert_eq!(session.toggle_play(), PlayState::Playing);
    let stale = narrator.last_utterance().expect("first frame narrated");

    session.load_code("x = 0\nx = 1");
    session.run_deep(false);
    assert_eq!(narrator.cancel_count(), 1);
    session.settle().await;
    assert_eq!(session.snapshot().frames.len(), 2);
    assert_eq!(session.snapshot().play_state, PlayState::Paused);

    // A completion for the cancelled utterance must not advance the new sequence
    narrator.finish(stale);
    match session.step().await {
        SessionEvent::Playback { index, state } => {
            assert_eq!(index, 0);
            assert_eq!(state, PlayState::Paused);
        }
        other => panic!("Expected Playback event, got {:?}", other),
    }
    assert_eq!(narrator.spoken_texts(), vec!["Start with [3, 1, 2]"]);
}

/// A saved trace replays without touching the oracle
#[tokio::test]
async fn test_saved_trace_round_trip_replay() {
    let data = DataDir::new();
    let oracle = Arc::new(MockOracle::new().with_fallback(MockResponse::text(BUBBLE_SORT)));
    let mut session = session_with(
        oracle.clone(),
        Arc::new(SilentNarrator),
        Arc::new(ResultCache::new()),
        "sort.py",
    );
    session.load_code(BUBBLE_SORT_CODE);
    session.run_deep(false);
    session.settle().await;

    let frames = session.snapshot().frames.to_vec();
    let saved = SavedTrace::new("Bubble sort", "sorting", Some(SourceId::new("sort.py")), frames);
    let path = data.path().join("bubble.json");
    saved.save_to(&path).expect("save");

    let loaded = SavedTrace::load(&path).expect("load");
    let narrator = RecordingNarrator::auto_finishing();
    let mut replay = session_with(
        oracle.clone(),
        Arc::new(narrator.clone()),
        Arc::new(ResultCache::new()),
        "sort.py",
    );
    replay.replay(loaded);

    let view = replay.snapshot();
    assert_eq!(view.status, Status::Ready);
    assert_eq!(view.replay.as_ref().map(|r| r.kind.as_str()), Some("sorting"));
    assert_eq!(view.frames.len(), 6);

    replay.toggle_play();
    while replay.playback().state() == PlayState::Playing {
        replay.step().await;
    }
    assert_eq!(narrator.spoken_texts().len(), 6);
    assert_eq!(replay.snapshot().index, 5);
    assert_eq!(oracle.invocation_count(), 1);
}
