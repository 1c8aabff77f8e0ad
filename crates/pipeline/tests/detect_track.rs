//! The default detect-and-track chain, end to end, with the built-in units.

use pipeline::{
    LinkConfig, PipelineConfig, PipelineError, RunOutcome, State, Supervisor, UnitConfig,
    UnitError,
};
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pipeline=debug")
        .with_test_writer()
        .try_init();
}

#[test]
fn test_default_chain_runs_to_end_of_stream() {
    init_logging();
    let framework = pipeline::init();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample_720p.h264");
    let output = dir.path().join("output.mp4");
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&input, &payload).unwrap();

    let config = PipelineConfig::detect_and_track(&input, &output);
    let mut graph = framework.build(&config).unwrap();
    assert_eq!(graph.len(), 13);
    assert_eq!(graph.links().len(), 11);
    assert_eq!(graph.pending_links().len(), 1);

    let outcome = Supervisor::new()
        .with_deadline(Duration::from_secs(30))
        .drive(&mut graph)
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            origin: "filesink".to_string()
        }
    );
    assert_eq!(graph.state(), State::Stopped);
    assert!(graph.units().all(|u| u.state() == State::Idle));
    assert_eq!(graph.links().len(), 12);
    assert!(graph.pending_links().is_empty());

    // The simulated stages pass payloads through untouched.
    assert_eq!(std::fs::read(&output).unwrap(), payload);
}

#[test]
fn test_missing_input_fails_to_start() {
    let framework = pipeline::init();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::detect_and_track(
        dir.path().join("missing.h264"),
        dir.path().join("output.mp4"),
    );
    let mut graph = framework.build(&config).unwrap();

    match Supervisor::new().drive(&mut graph) {
        Err(PipelineError::Transition { unit, source, .. }) => {
            assert_eq!(unit, "file-source");
            assert!(matches!(source, UnitError::Resource(_)));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(graph.units().all(|u| u.state() == State::Idle));
}

#[test]
fn test_batch_size_bounds_muxer_inputs() {
    let framework = pipeline::init();
    let mut config = PipelineConfig::new("two-sources");
    config.units = vec![
        UnitConfig::new("a", "filesrc").with("location", "a.h264"),
        UnitConfig::new("b", "filesrc").with("location", "b.h264"),
        UnitConfig::new("mux", "nvstreammux").with("batch-size", 1),
        UnitConfig::new("sink", "filesink").with("location", "out.mp4"),
    ];
    config.links = vec![
        LinkConfig::new("a", "mux.sink_0"),
        LinkConfig::new("b", "mux.sink_1"),
        LinkConfig::new("mux", "sink"),
    ];

    match framework.build(&config) {
        Err(PipelineError::Unit { unit, source }) => {
            assert_eq!(unit, "mux");
            assert_eq!(source, UnitError::CapacityExceeded { limit: 1 });
        }
        other => panic!("unexpected result {:?}", other.map(|g| g.len())),
    }
}

#[test]
fn test_unknown_type_is_a_setup_failure() {
    let framework = pipeline::init();
    let mut config = PipelineConfig::new("bad");
    config.units = vec![UnitConfig::new("x", "nvgpuwarp")];
    let err = framework.build(&config).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownType { .. }));
    assert_eq!(err.class(), pipeline::FailureClass::Setup);
}

#[test]
fn test_pipeline_file_matches_builtin_topology() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../pipelines/detect_track.yaml");
    let mut config = PipelineConfig::from_path(path).unwrap();
    config.substitute("input", "clip.h264");
    config.substitute("output", "output.mp4");

    let builtin = PipelineConfig::detect_and_track("clip.h264", "output.mp4");
    assert_eq!(config.links, builtin.links);
    let names: Vec<&str> = config.units.iter().map(|u| u.name.as_str()).collect();
    let builtin_names: Vec<&str> = builtin.units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, builtin_names);
    assert_eq!(config, builtin);
}
