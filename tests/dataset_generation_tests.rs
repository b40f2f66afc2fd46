// tests/dataset_generation_tests.rs
//
// End-to-end dataset generation: trace files on disk -> BatchRunner ->
// .npz archives + metadata.json.


use std::fs;
use std::fs::File;

use ndarray::{Array1, Array4};
use ndarray_npy::NpzReader;
use tempfile::tempdir;

use ditto::batch::{BatchRunner, DatasetMetadata, ScenarioOutcome};
use ditto::config::ViewMode;
use ditto::sim::trace::TraceLoader;
use trace_testkit::*;

fn read_episode(path: &std::path::Path) -> (Array4<u8>, Array1<i64>, Array1<bool>) {
    let mut npz = NpzReader::new(File::open(path).unwrap()).unwrap();
    let images: Array4<u8> = npz.by_name("images").unwrap();
    let actions: Array1<i64> = npz.by_name("actions").unwrap();
    let resets: Array1<bool> = npz.by_name("resets").unwrap();
    (images, actions, resets)
}

#[test]
fn batch_writes_one_archive_per_scenario() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_trace(
        input.path(),
        "b.json",
        &trace_of(vec![straight_vehicle(1, 0.0, 12, 5.0)]),
    );
    write_trace(
        input.path(),
        "a.json",
        &trace_of(vec![straight_vehicle(4, 0.0, 12, 5.0), parked_vehicle(5, 4.0, 12)]),
    );

    let runner = BatchRunner::new(TraceLoader, small_config(10));
    let summary = runner.run(input.path(), output.path()).unwrap();

    assert_eq!(summary.written, 2);
    assert_eq!(summary.frames, 20);
    assert_eq!(summary.reports[0].scenario, "a.json");
    assert_eq!(summary.reports[1].scenario, "b.json");

    for name in ["a.npz", "b.npz"] {
        let (images, actions, resets) = read_episode(&output.path().join(name));
        assert_eq!(images.dim(), (10, 12, 16, 3));
        assert_eq!(actions.len(), 10);
        assert_eq!(resets.len(), 10);
        assert!(resets[9]);
        assert!(resets.iter().take(9).all(|r| !*r));
    }
}

#[test]
fn batch_skips_manifest_file() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_trace(
        input.path(),
        "scene.json",
        &trace_of(vec![straight_vehicle(1, 0.0, 6, 5.0)]),
    );
    fs::write(input.path().join("valid_files.json"), r#"{"scene.json": true}"#).unwrap();

    let runner = BatchRunner::new(TraceLoader, small_config(5));
    let summary = runner.run(input.path(), output.path()).unwrap();

    assert_eq!(summary.total(), 1);
    assert_eq!(summary.written, 1);
    assert!(!output.path().join("valid_files.npz").exists());
}

#[test]
fn corrupt_file_fails_without_aborting_batch() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    fs::write(input.path().join("a_broken.json"), "{ not json").unwrap();
    write_trace(
        input.path(),
        "b_good.json",
        &trace_of(vec![straight_vehicle(1, 0.0, 6, 5.0)]),
    );

    let runner = BatchRunner::new(TraceLoader, small_config(5));
    let summary = runner.run(input.path(), output.path()).unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.written, 1);
    match &summary.reports[0].outcome {
        ScenarioOutcome::Failed { reason } => assert!(reason.contains("a_broken.json")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(output.path().join("b_good.npz").exists());
}

#[test]
fn nan_steering_at_step_five_skips_scenario() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let mut v = straight_vehicle(1, 0.0, 12, 5.0);
    v.expert_actions[5] = Some([Some(0.3), None]);
    write_trace(input.path(), "gap.json", &trace_of(vec![v]));

    let runner = BatchRunner::new(TraceLoader, small_config(10));
    let summary = runner.run(input.path(), output.path()).unwrap();

    assert_eq!(summary.skipped, 1);
    assert!(matches!(
        summary.reports[0].outcome,
        ScenarioOutcome::Skipped { .. }
    ));
    assert!(!output.path().join("gap.npz").exists());
}

#[test]
fn nan_after_horizon_does_not_disqualify() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let mut v = straight_vehicle(1, 0.0, 12, 5.0);
    v.expert_actions[5] = Some([Some(0.3), None]);
    write_trace(input.path(), "short.json", &trace_of(vec![v]));

    let runner = BatchRunner::new(TraceLoader, small_config(5));
    let summary = runner.run(input.path(), output.path()).unwrap();
    assert_eq!(summary.written, 1);
}

#[test]
fn metadata_records_outcomes_and_config() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_trace(
        input.path(),
        "one.json",
        &trace_of(vec![straight_vehicle(1, 0.0, 6, 5.0)]),
    );
    fs::write(input.path().join("two.json"), "[]").unwrap();

    let mut cfg = small_config(4);
    cfg.render.view_mode = ViewMode::Cone;
    cfg.render.grayscale = true;
    let runner = BatchRunner::new(TraceLoader, cfg);
    runner.run(input.path(), output.path()).unwrap();

    let raw = fs::read_to_string(output.path().join("metadata.json")).unwrap();
    let meta: DatasetMetadata = serde_json::from_str(&raw).unwrap();
    assert_eq!(meta.dataset_version, 1);
    assert_eq!(meta.num_scenarios, 2);
    assert_eq!(meta.num_written, 1);
    assert_eq!(meta.num_failed, 1);
    assert_eq!(meta.num_frames, 4);
    assert_eq!(meta.num_actions, 12 * 14 + 14 + 1);
    assert_eq!(meta.config.render.view_mode, ViewMode::Cone);

    let (images, _, _) = read_episode(&output.path().join("one.npz"));
    assert_eq!(images.dim(), (4, 12, 16, 1));
}

#[test]
fn single_file_input_is_processed() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let file = write_trace(
        input.path(),
        "solo.json",
        &trace_of(vec![straight_vehicle(1, 0.0, 6, 5.0)]),
    );

    let runner = BatchRunner::new(TraceLoader, small_config(3));
    let summary = runner.run(&file, output.path()).unwrap();
    assert_eq!(summary.written, 1);
    assert!(output.path().join("solo.npz").exists());
}

#[test]
fn rerun_overwrites_archives() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_trace(
        input.path(),
        "s.json",
        &trace_of(vec![straight_vehicle(1, 0.0, 10, 5.0)]),
    );

    BatchRunner::new(TraceLoader, small_config(8))
        .run(input.path(), output.path())
        .unwrap();
    BatchRunner::new(TraceLoader, small_config(3))
        .run(input.path(), output.path())
        .unwrap();

    let (images, actions, _) = read_episode(&output.path().join("s.npz"));
    assert_eq!(images.dim().0, 3);
    assert_eq!(actions.len(), 3);
}
