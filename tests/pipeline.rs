// tests/pipeline.rs

mod common;

use std::{thread, time::Duration};

use approx::assert_abs_diff_eq;
use common::{
    decode_bytes, pipeline_with, sine, wav_bytes, CrashingSeparator, MismatchedSeparator,
    MockSeparator,
};
use stem_splitter_server::{
    io::transport, DemucsSeparator, InputLimits, OutputPolicy, Pipeline, SeparationError,
    SeparationRequest, Separator, WorkspaceManager, MP3_CONTENT_TYPE,
};

fn request_for(seconds: f32, channels: u16) -> SeparationRequest {
    SeparationRequest::new(transport::encode(&wav_bytes(&sine(seconds, 44_100, channels, 440.0))))
}

#[test]
fn test_missing_audio_is_rejected_before_any_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("ws");
    let separator = MockSeparator::four_stems();
    let calls = separator.calls();
    let pipeline = pipeline_with(&root, separator);

    let request = SeparationRequest {
        audio_content: None,
        ..SeparationRequest::new("")
    };
    let err = pipeline.process(request).unwrap_err();

    assert!(matches!(err, SeparationError::Decoding(_)), "got {err:?}");
    assert_eq!(err.status_code(), 400);
    assert!(!root.exists(), "no workspace root should have been created");
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_undecodable_audio_is_rejected_before_any_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("ws");
    let pipeline = pipeline_with(&root, MockSeparator::four_stems());

    for content in ["%%% not base64 %%%", transport::encode(b"just some text, no audio").as_str()] {
        let err = pipeline.process(SeparationRequest::new(content)).unwrap_err();
        assert!(matches!(err, SeparationError::Decoding(_)), "got {err:?}");
    }
    assert!(!root.exists());
}

#[test]
fn test_unknown_stem_fails_after_the_model_ran() {
    let tmp = tempfile::tempdir().unwrap();
    let separator = MockSeparator::four_stems();
    let calls = separator.calls();
    let pipeline = pipeline_with(tmp.path(), separator);

    let request = SeparationRequest {
        target_stem: "trumpet".into(),
        ..request_for(0.5, 2)
    };
    let err = pipeline.process(request).unwrap_err();

    match &err {
        SeparationError::UnknownStem { stem, available } => {
            assert_eq!(stem, "trumpet");
            assert_eq!(available, &["bass", "drums", "other", "vocals"]);
        }
        other => panic!("expected UnknownStem, got {other:?}"),
    }
    assert_eq!(err.status_code(), 400);
    assert_eq!(calls.lock().unwrap().len(), 1, "model runs exactly once");
    assert_eq!(pipeline.workspaces().active_count(), 0);
}

#[test]
fn test_stem_names_are_case_sensitive() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(tmp.path(), MockSeparator::four_stems());

    let request = SeparationRequest {
        target_stem: "Vocals".into(),
        ..request_for(0.5, 2)
    };
    let err = pipeline.process(request).unwrap_err();
    assert!(matches!(err, SeparationError::UnknownStem { .. }), "got {err:?}");
}

#[test]
fn test_ten_second_mono_clip_is_separated() {
    let tmp = tempfile::tempdir().unwrap();
    let separator = MockSeparator::four_stems();
    let calls = separator.calls();
    let pipeline = pipeline_with(tmp.path(), separator);

    let result = pipeline.process(request_for(10.0, 1)).expect("separation failed");

    assert_eq!(result.target_stem, "vocals");
    assert_eq!(result.content_type, MP3_CONTENT_TYPE);
    for encoded in [&result.vocal_audio, &result.bg_audio] {
        let bytes = transport::decode(encoded).expect("response must be valid base64");
        let audio = decode_bytes(&bytes, "mp3");
        assert!((1..=2).contains(&audio.channels));
        assert_abs_diff_eq!(audio.duration_secs(), 10.0, epsilon = 0.2);
    }

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.ends_with("input.wav"), "staged as {:?}", calls[0].0);
    assert_eq!(pipeline.workspaces().active_count(), 0);
}

#[test]
fn test_background_is_louder_than_single_stem() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(tmp.path(), MockSeparator::four_stems());

    let result = pipeline.process(request_for(1.0, 2)).unwrap();
    let rms = |text: &str| {
        let audio = decode_bytes(&transport::decode(text).unwrap(), "mp3");
        let sum: f32 = audio.samples.iter().map(|s| s * s).sum();
        (sum / audio.samples.len() as f32).sqrt()
    };

    // Three quarter-level stems against one.
    let ratio = rms(&result.bg_audio) / rms(&result.vocal_audio);
    assert!((2.5..3.5).contains(&ratio), "ratio {ratio}");
}

#[test]
fn test_target_only_model_yields_silent_background() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(tmp.path(), MockSeparator::new(&["vocals"]));

    let result = pipeline.process(request_for(1.0, 2)).expect("separation failed");
    let bg = decode_bytes(&transport::decode(&result.bg_audio).unwrap(), "mp3");

    assert_abs_diff_eq!(bg.duration_secs(), 1.0, epsilon = 0.15);
    assert!(bg.samples.iter().all(|s| s.abs() < 1e-3));
}

#[test]
fn test_empty_stem_and_model_fall_back_to_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(tmp.path(), MockSeparator::four_stems());

    let request = SeparationRequest {
        target_stem: "  ".into(),
        model: String::new(),
        ..request_for(0.5, 2)
    };
    let valid = pipeline.validate(request).expect("validation failed");
    assert_eq!(valid.target_stem, "vocals");
    assert_eq!(valid.model, "htdemucs");
    assert_eq!(valid.probe.extension, "wav");
}

#[test]
fn test_separator_crash_still_removes_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let separator = CrashingSeparator::default();
    let seen = separator.workspaces.clone();
    let pipeline = pipeline_with(tmp.path(), separator);

    let err = pipeline.process(request_for(0.5, 2)).unwrap_err();

    assert!(matches!(err, SeparationError::SeparationExecution(_)), "got {err:?}");
    assert_eq!(err.status_code(), 500);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].exists(), "workspace {:?} left behind", seen[0]);
    assert_eq!(pipeline.workspaces().active_count(), 0);
}

#[test]
fn test_mismatched_stems_are_format_errors() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(tmp.path(), MismatchedSeparator);

    let err = pipeline.process(request_for(0.5, 2)).unwrap_err();
    assert!(matches!(err, SeparationError::FormatMismatch(_)), "got {err:?}");
    assert_eq!(err.status_code(), 500);
    assert_eq!(pipeline.workspaces().active_count(), 0);
}

#[test]
fn test_unknown_model_is_client_error() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(tmp.path(), DemucsSeparator::default());

    let request = SeparationRequest {
        model: "not_a_model".into(),
        ..request_for(0.5, 2)
    };
    let err = pipeline.process(request).unwrap_err();

    assert!(matches!(err, SeparationError::UnknownModel(_)), "got {err:?}");
    assert_eq!(err.status_code(), 400);
    assert_eq!(pipeline.workspaces().active_count(), 0);
}

#[test]
fn test_input_ceilings_are_enforced() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("ws");
    let make = |limits: InputLimits| {
        Pipeline::new(
            WorkspaceManager::new(&root),
            Box::new(MockSeparator::four_stems()) as Box<dyn Separator>,
            OutputPolicy::default(),
            limits,
        )
    };

    let err = make(InputLimits {
        max_bytes: 1024,
        max_seconds: None,
    })
    .process(request_for(1.0, 2))
    .unwrap_err();
    assert!(matches!(err, SeparationError::PayloadTooLarge { .. }), "got {err:?}");
    assert_eq!(err.status_code(), 413);

    let err = make(InputLimits {
        max_bytes: usize::MAX,
        max_seconds: Some(1),
    })
    .process(request_for(2.0, 1))
    .unwrap_err();
    assert!(matches!(err, SeparationError::InputTooLong { .. }), "got {err:?}");
    assert_eq!(err.status_code(), 413);

    assert!(!root.exists());
}

#[test]
fn test_concurrent_requests_are_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let separator = MockSeparator::four_stems().with_delay(Duration::from_millis(200));
    let calls = separator.calls();
    let pipeline = pipeline_with(tmp.path(), separator);

    let short = request_for(1.0, 2);
    let long = request_for(2.0, 1);

    let (short_result, long_result) = thread::scope(|s| {
        let a = s.spawn(|| pipeline.process(short));
        let b = s.spawn(|| pipeline.process(long));
        (a.join().unwrap(), b.join().unwrap())
    });

    let duration = |text: &str| decode_bytes(&transport::decode(text).unwrap(), "mp3").duration_secs();
    let short_result = short_result.expect("short request failed");
    let long_result = long_result.expect("long request failed");
    assert_abs_diff_eq!(duration(&short_result.vocal_audio), 1.0, epsilon = 0.15);
    assert_abs_diff_eq!(duration(&short_result.bg_audio), 1.0, epsilon = 0.15);
    assert_abs_diff_eq!(duration(&long_result.vocal_audio), 2.0, epsilon = 0.15);
    assert_abs_diff_eq!(duration(&long_result.bg_audio), 2.0, epsilon = 0.15);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0].1, calls[1].1, "workspaces must differ");
    assert_ne!(calls[0].0, calls[1].0, "staged inputs must differ");
    assert_eq!(pipeline.workspaces().active_count(), 0);
}

#[test]
fn test_same_input_twice_gives_same_output() {
    let tmp = tempfile::tempdir().unwrap();
    let pipeline = pipeline_with(tmp.path(), MockSeparator::four_stems());

    let first = pipeline.process(request_for(0.5, 2)).unwrap();
    let second = pipeline.process(request_for(0.5, 2)).unwrap();
    assert_eq!(first.vocal_audio, second.vocal_audio);
    assert_eq!(first.bg_audio, second.bg_audio);
}
