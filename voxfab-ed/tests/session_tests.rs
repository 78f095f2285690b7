//! Artifact session behaviour: transitions, baselines, failure atomicity
//! and linearized concurrent edits

mod helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use voxfab_common::events::EventBus;
use voxfab_ed::engine::mock::{MockCall, MockEngine};
use voxfab_ed::engine::{ModelHandle, ProgressSink};
use voxfab_ed::session::{ArtifactState, SessionHandle};
use voxfab_ed::EditorError;

use helpers::{session_fixture, short_timeouts, wav_samples, TestApp};

fn model(name: &str) -> Option<Arc<ModelHandle>> {
    Some(Arc::new(ModelHandle {
        folder_name: name.to_string(),
        folder_path: name.into(),
        engine_ref: format!("mock:{name}"),
        loaded_at: chrono::Utc::now(),
    }))
}

/// "hello world" at 16 kHz: (0.5 + 11 * 0.08) s
const HELLO_SAMPLES: usize = 22_080;

async fn generated(session: &SessionHandle) {
    session.generate(model("voiceA"), "hello world").await.unwrap();
}

fn read(path: &std::path::Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[tokio::test]
async fn test_generate_requires_text_then_model() {
    let (_dir, engine, session) = session_fixture();

    let err = session.generate(model("voiceA"), "   ").await.unwrap_err();
    assert!(matches!(err, EditorError::EmptyText));
    let err = session.generate(None, "hello").await.unwrap_err();
    assert!(matches!(err, EditorError::NoModelLoaded));

    assert!(engine.calls().is_empty());
    assert_eq!(session.snapshot().await.state, ArtifactState::Empty);
}

#[tokio::test]
async fn test_generate_establishes_current_backup_and_baseline() {
    let (_dir, _engine, session) = session_fixture();
    generated(&session).await;

    let snap = session.snapshot().await;
    assert_eq!(snap.state, ArtifactState::Generated);
    assert_eq!(snap.generation, 1);
    assert_eq!((snap.pitch_offset, snap.speed_factor), (0.0, 1.0));

    let paths = session.paths();
    assert_eq!(wav_samples(&paths.current), HELLO_SAMPLES);
    assert_eq!(read(&paths.current), read(&paths.backup));
    assert_eq!(read(&paths.current), read(&paths.cropped_baseline));
}

#[tokio::test]
async fn test_edits_before_generate_report_no_artifact() {
    let (_dir, engine, session) = session_fixture();

    assert!(matches!(session.chop(0.0, 1.0).await, Err(EditorError::NoArtifact)));
    assert!(matches!(
        session.adjust_pitch(1.0, ProgressSink::discard()).await,
        Err(EditorError::NoArtifact)
    ));
    assert!(matches!(
        session.adjust_speed(0.5, ProgressSink::discard()).await,
        Err(EditorError::NoArtifact)
    ));
    assert!(matches!(session.reset().await, Err(EditorError::NoBackup)));
    assert!(matches!(
        session.current_audio().await,
        Err(EditorError::NoArtifact)
    ));
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_chop_baseline_equals_new_current() {
    let (_dir, _engine, session) = session_fixture();
    generated(&session).await;

    for (start, end) in [(0.0, 1.0), (0.1, 0.6), (0.2, 0.3)] {
        let snap = session.chop(start, end).await.unwrap();
        assert_eq!(snap.state, ArtifactState::Cropped);

        let paths = session.paths();
        assert_eq!(read(&paths.current), read(&paths.cropped_baseline));
        assert_eq!(
            wav_samples(&paths.current),
            ((end - start) * 16_000.0).round() as usize
        );
    }
}

#[tokio::test]
async fn test_chop_rejects_invalid_ranges_without_side_effects() {
    let (_dir, engine, session) = session_fixture();
    generated(&session).await;
    engine.clear_calls();
    let before = session.snapshot().await;

    let ranges = [
        (1.0, 1.0),
        (2.0, 1.0),
        (-0.5, 1.0),
        (f64::NAN, 1.0),
        (0.0, f64::INFINITY),
    ];
    for (start, end) in ranges {
        let err = session.chop(start, end).await.unwrap_err();
        assert!(matches!(err, EditorError::InvalidRange { .. }));
    }
    assert!(engine.calls().is_empty());
    assert_eq!(session.snapshot().await, before);
}

#[tokio::test]
async fn test_speed_to_non_positive_is_a_noop() {
    let (_dir, engine, session) = session_fixture();
    generated(&session).await;
    session.adjust_speed(0.5, ProgressSink::discard()).await.unwrap();
    let before = session.snapshot().await;
    let current_before = read(&session.paths().current);
    let transforms = engine.transform_count();

    for delta in [-1.5, -2.0, -100.0] {
        let outcome = session
            .adjust_speed(delta, ProgressSink::discard())
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.snapshot.speed_factor, 1.5);
    }

    assert_eq!(engine.transform_count(), transforms);
    assert_eq!(session.snapshot().await, before);
    assert_eq!(read(&session.paths().current), current_before);
}

#[tokio::test]
async fn test_pitch_changes_by_exactly_delta() {
    let (_dir, _engine, session) = session_fixture();
    generated(&session).await;

    let mut expected = 0.0;
    for delta in [2.0, -5.0, 0.25, -0.25, 40.0, -80.0] {
        expected += delta;
        let outcome = session
            .adjust_pitch(delta, ProgressSink::discard())
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.snapshot.pitch_offset, expected);
        assert_eq!(outcome.snapshot.state, ArtifactState::Adjusted);
    }
}

#[tokio::test]
async fn test_non_finite_delta_is_rejected() {
    let (_dir, engine, session) = session_fixture();
    generated(&session).await;
    engine.clear_calls();

    for delta in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert!(matches!(
            session.adjust_pitch(delta, ProgressSink::discard()).await,
            Err(EditorError::InvalidDelta(_))
        ));
        assert!(matches!(
            session.adjust_speed(delta, ProgressSink::discard()).await,
            Err(EditorError::InvalidDelta(_))
        ));
    }
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_transforms_read_from_baseline_not_previous_output() {
    let (_dir, engine, session) = session_fixture();
    generated(&session).await;

    session.adjust_speed(1.0, ProgressSink::discard()).await.unwrap();
    assert_eq!(wav_samples(&session.paths().current), HELLO_SAMPLES / 2);

    // Compounding would give HELLO_SAMPLES / 2 / 3
    session.adjust_speed(1.0, ProgressSink::discard()).await.unwrap();
    assert_eq!(wav_samples(&session.paths().current), HELLO_SAMPLES / 3);

    let baseline = session.paths().cropped_baseline.clone();
    for call in engine.calls() {
        if let MockCall::ChangeSpeed { src, .. } | MockCall::ShiftPitch { src, .. } = call {
            assert_eq!(src, baseline);
        }
    }
    assert!(engine
        .calls()
        .contains(&MockCall::ChangeSpeed { src: baseline, factor: 3.0 }));
}

#[tokio::test]
async fn test_reset_restores_backup_and_zeroes_offsets() {
    let (_dir, _engine, session) = session_fixture();
    generated(&session).await;
    session.chop(0.2, 1.0).await.unwrap();
    session.adjust_pitch(3.0, ProgressSink::discard()).await.unwrap();
    session.adjust_speed(-0.4, ProgressSink::discard()).await.unwrap();
    let baseline_before = read(&session.paths().cropped_baseline);

    let snap = session.reset().await.unwrap();
    assert_eq!((snap.pitch_offset, snap.speed_factor), (0.0, 1.0));
    assert_eq!(snap.state, ArtifactState::Generated);

    let paths = session.paths();
    assert_eq!(read(&paths.current), read(&paths.backup));
    // The cropped baseline survives a reset
    assert_eq!(read(&paths.cropped_baseline), baseline_before);
}

#[tokio::test]
async fn test_failed_transform_leaves_session_unchanged() {
    let (dir, engine, session) = session_fixture();
    generated(&session).await;
    session.adjust_pitch(1.0, ProgressSink::discard()).await.unwrap();
    let before = session.snapshot().await;
    let current_before = read(&session.paths().current);

    engine.set_fail_transforms(true);
    let err = session
        .adjust_pitch(2.0, ProgressSink::discard())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "mock transform failure");
    assert!(matches!(session.chop(0.0, 0.5).await, Err(EditorError::Transform(_))));

    assert_eq!(session.snapshot().await, before);
    assert_eq!(read(&session.paths().current), current_before);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("work"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
}

#[tokio::test]
async fn test_failed_synthesis_keeps_previous_artifact() {
    let (_dir, engine, session) = session_fixture();
    generated(&session).await;
    let current_before = read(&session.paths().current);

    engine.set_fail_synthesis(true);
    let err = session.generate(model("voiceA"), "other text").await.unwrap_err();
    assert!(matches!(err, EditorError::Synthesis(_)));
    assert_eq!(session.snapshot().await.generation, 1);
    assert_eq!(read(&session.paths().current), current_before);
}

#[tokio::test]
async fn test_slow_transform_times_out() {
    let dir = tempfile::TempDir::new().unwrap();
    let engine = Arc::new(MockEngine::new());
    let session = SessionHandle::new(
        &dir.path().join("work"),
        engine.clone(),
        engine.clone(),
        EventBus::new(16),
        short_timeouts(),
    );
    generated(&session).await;
    engine.set_transform_delay(Some(Duration::from_secs(3)));

    let err = session
        .adjust_pitch(1.0, ProgressSink::discard())
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::Timeout { .. }));
    assert_eq!(session.snapshot().await.pitch_offset, 0.0);
}

#[tokio::test]
async fn test_concurrent_pitch_adjustments_are_linearized() {
    let (_dir, engine, session) = session_fixture();
    generated(&session).await;
    engine.set_transform_delay(Some(Duration::from_millis(40)));

    let mut tasks = JoinSet::new();
    for delta in [2.0, -5.0] {
        let session = session.clone();
        tasks.spawn(async move { session.adjust_pitch(delta, ProgressSink::discard()).await });
    }
    let mut offsets = Vec::new();
    while let Some(result) = tasks.join_next().await {
        offsets.push(result.unwrap().unwrap().snapshot.pitch_offset);
    }
    offsets.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let snap = session.snapshot().await;
    assert_eq!(snap.pitch_offset, -3.0);
    assert_eq!(snap.generation, 3);
    // Whichever ran first saw its own delta applied to 0
    assert!(offsets == vec![-5.0, -3.0] || offsets == vec![-3.0, 2.0], "{offsets:?}");
}

#[tokio::test]
async fn test_keep_validates_before_touching_dataset() {
    let app = TestApp::with_models(&["voiceA"]);
    let session = &app.state.session;
    session.generate(model("voiceA"), "hello world").await.unwrap();

    for (text, model_name) in [("", "voiceA"), ("   ", "voiceA"), ("hello", "  ")] {
        let err = session
            .keep(&app.state.dataset, text, model_name)
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::Validation(_)));
    }
    assert!(!app.state.dataset.manifest_path("voiceA").exists());
}

#[tokio::test]
async fn test_keep_without_artifact() {
    let app = TestApp::with_models(&["voiceA"]);
    let err = app
        .state
        .session
        .keep(&app.state.dataset, "hello", "voiceA")
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::NoArtifact));
}

#[tokio::test]
async fn test_end_to_end_generate_edit_keep() {
    let app = TestApp::with_models(&["voiceA"]);
    let state = &app.state;

    state.registry.activate("voiceA").await.unwrap();
    state
        .session
        .generate(state.registry.active(), "hello world")
        .await
        .unwrap();
    state.session.chop(0.5, 2.0).await.unwrap();
    state
        .session
        .adjust_speed(0.3, ProgressSink::discard())
        .await
        .unwrap();
    let entry = state
        .session
        .keep(&state.dataset, "hello world", "voiceA")
        .await
        .unwrap();

    let manifest = std::fs::read_to_string(state.dataset.manifest_path("voiceA")).unwrap();
    let lines: Vec<&str> = manifest.lines().collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0], format!("{}|hello world", entry.filename));
    assert!(entry.filename.starts_with("voiceA_") && entry.filename.ends_with(".wav"));
    assert!(app.layout().kept_dir().join(&entry.filename).is_file());
    assert_eq!(
        std::fs::read(&entry.path).unwrap(),
        std::fs::read(&state.session.paths().current).unwrap()
    );
}

#[tokio::test]
async fn test_end_to_end_missing_model_keeps_active() {
    let app = TestApp::with_models(&["voiceA"]);
    let registry = &app.state.registry;
    assert!(registry.active().is_none());

    let err = registry.activate("missing-folder").await.unwrap_err();
    assert!(matches!(err, EditorError::ModelLoad(_)));
    assert!(registry.active().is_none());

    registry.activate("voiceA").await.unwrap();
    registry.activate("missing-folder").await.unwrap_err();
    assert_eq!(registry.active().unwrap().folder_name, "voiceA");
}

#[tokio::test]
async fn test_transitions_emit_events() {
    let app = TestApp::with_models(&["voiceA"]);
    let state = &app.state;
    let mut rx = state.event_bus.subscribe();

    state.registry.activate("voiceA").await.unwrap();
    state
        .session
        .generate(state.registry.active(), "hi")
        .await
        .unwrap();
    state.session.chop(0.0, 0.3).await.unwrap();
    state
        .session
        .adjust_pitch(1.0, ProgressSink::discard())
        .await
        .unwrap();
    state.session.reset().await.unwrap();
    state
        .session
        .keep(&state.dataset, "hi", "voiceA")
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.event_type());
    }
    assert_eq!(
        kinds,
        vec![
            "ModelActivated",
            "ArtifactGenerated",
            "ArtifactCropped",
            "ArtifactAdjusted",
            "ArtifactReset",
            "TakeKept"
        ]
    );
}
