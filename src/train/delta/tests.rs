//! Tests for the delta pattern regularizer

use super::*;
use crate::tensor::Device;
use crate::train::{MemorySink, MetricsSink, TrainProgress};
use crate::Tensor;
use approx::assert_relative_eq;
use tempfile::TempDir;

fn t(values: &[f32]) -> Tensor {
    Tensor::from_vec(values.to_vec(), &[values.len()]).unwrap()
}

fn named(params: &[(&str, Tensor)]) -> Vec<(String, Tensor)> {
    params.iter().map(|(k, t)| (k.to_string(), t.clone())).collect()
}

fn refs(params: &[(String, Tensor)]) -> Vec<(String, &Tensor)> {
    params.iter().map(|(k, t)| (k.clone(), t)).collect()
}

fn at_epoch(epoch: usize) -> TrainProgress {
    TrainProgress { epoch, epoch_step: 0, global_step: 10 * epoch, total_epochs: 10 }
}

/// Run 1 from `[0, 0]`/`[1]` to `[1, 2]`/`[1]`, pattern saved flat in `dir`.
fn saved_flat_pattern(dir: &TempDir) -> std::path::PathBuf {
    let mut run1 = DeltaPatternRegularizer::new(DeltaPatternConfig::default());
    let start = named(&[("w", t(&[0.0, 0.0])), ("b", t(&[1.0]))]);
    run1.capture_weights(&refs(&start)).unwrap();
    let end = named(&[("w", t(&[1.0, 2.0])), ("b", t(&[1.0]))]);
    run1.save_pattern(&refs(&end), dir.path(), "delta").unwrap()
}

#[test]
fn test_penalty_is_zero_without_reference() {
    let mut reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default());
    let params = named(&[("w", t(&[1.0]))]);
    reg.capture_initial_weights_run2(&refs(&params)).unwrap();
    assert_eq!(reg.compute_penalty(&refs(&params), 1.0, &at_epoch(0), None), 0.0);
}

#[test]
fn test_penalty_is_zero_without_run2_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = saved_flat_pattern(&dir);
    let reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default().with_reference(&path));
    assert!(reg.has_reference());
    let params = named(&[("w", t(&[5.0, 5.0]))]);
    assert_eq!(reg.compute_penalty(&refs(&params), 1.0, &at_epoch(0), None), 0.0);
}

#[test]
fn test_missing_and_malformed_reference_are_not_errors() {
    let dir = TempDir::new().unwrap();
    let mut reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default());
    assert!(!reg.load_reference_pattern(dir.path().join("missing.safetensors")));

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{not json").unwrap();
    assert!(!reg.load_reference_pattern(&bad));
    assert!(reg.reference().is_empty());
    assert_eq!(reg.reference_norm(), 0.0);
}

#[test]
fn test_saved_pattern_and_log() {
    let dir = TempDir::new().unwrap();
    let path = saved_flat_pattern(&dir);
    assert_eq!(path, dir.path().join("delta.safetensors"));

    let pattern = ReferencePattern::load(&path).unwrap();
    let ReferencePattern::Flat(map) = &pattern else { panic!("expected a flat pattern") };
    assert_eq!(map["w"].to_vec(), vec![1.0, 2.0]);
    assert_eq!(map["b"].to_vec(), vec![0.0]);

    let log = std::fs::read_to_string(dir.path().join("delta.log")).unwrap();
    assert!(log.contains("tensors: 2"));
    assert!(log.contains("total L2 norm"));
    assert!(log.find("  w").unwrap() < log.find("  b").unwrap());
}

#[test]
fn test_save_requires_run1_snapshot() {
    let dir = TempDir::new().unwrap();
    let reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default());
    let params = named(&[("w", t(&[1.0]))]);
    assert!(reg.save_pattern(&refs(&params), dir.path(), "delta").is_err());
}

#[test]
fn test_mse_penalty_against_flat_reference() {
    let dir = TempDir::new().unwrap();
    let path = saved_flat_pattern(&dir);
    let mut reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default().with_reference(&path));
    assert_relative_eq!(reg.reference_norm(), 5.0f64.sqrt(), epsilon = 1e-12);

    let start = named(&[("w", t(&[10.0, 10.0])), ("b", t(&[0.0])), ("extra", t(&[3.0]))]);
    reg.capture_initial_weights_run2(&refs(&start)).unwrap();

    // Same trajectory as the reference: no penalty.
    let same = named(&[("w", t(&[11.0, 12.0])), ("b", t(&[0.0])), ("extra", t(&[9.0]))]);
    assert_relative_eq!(reg.compute_penalty(&refs(&same), 2.0, &at_epoch(3), None), 0.0);

    // deltas [0, 0] and [1] vs [1, 2] and [0]: (1 + 4 + 1) / 3 = 2
    let off = named(&[("w", t(&[10.0, 10.0])), ("b", t(&[1.0]))]);
    let mut sink = MemorySink::new();
    let penalty = reg.compute_penalty(&refs(&off), 0.5, &at_epoch(3), Some(&mut sink as &mut dyn MetricsSink));
    assert_relative_eq!(penalty, 1.0, epsilon = 1e-12);
    assert_eq!(sink.series("delta/penalty"), &[(30, penalty)]);
    assert_relative_eq!(sink.last("delta/distance").unwrap(), 2.0, epsilon = 1e-12);
    // Only `w` and `b` are compared: |[0, 0, 1]| = 1, |[1, 2, 0]| = sqrt(5)
    assert_eq!(sink.series("delta/current_norm"), &[(30, 1.0)]);
    assert_relative_eq!(sink.last("delta/reference_norm").unwrap(), 5.0f64.sqrt(), epsilon = 1e-12);
    assert_eq!(reg.last_norms(), DeltaNorms { current: 1.0, reference: sink.last("delta/reference_norm").unwrap() });

    assert_relative_eq!(reg.penalty(&refs(&off), &at_epoch(3), None), 0.1 * 2.0, epsilon = 1e-12);
}

#[test]
fn test_cosine_penalty() {
    let dir = TempDir::new().unwrap();
    let path = saved_flat_pattern(&dir);
    let config = DeltaPatternConfig::default().with_metric(DeltaMetric::Cosine).with_reference(&path);
    let mut reg = DeltaPatternRegularizer::new(config);
    let start = named(&[("w", t(&[0.0, 0.0])), ("b", t(&[0.0]))]);
    reg.capture_initial_weights_run2(&refs(&start)).unwrap();

    // Parallel to the reference [1, 2, 0] regardless of magnitude.
    let scaled = named(&[("w", t(&[3.0, 6.0])), ("b", t(&[0.0]))]);
    assert_relative_eq!(reg.compute_penalty(&refs(&scaled), 1.0, &at_epoch(0), None), 0.0, epsilon = 1e-9);

    let opposite = named(&[("w", t(&[-1.0, -2.0])), ("b", t(&[0.0]))]);
    assert_relative_eq!(reg.compute_penalty(&refs(&opposite), 1.0, &at_epoch(0), None), 2.0, epsilon = 1e-9);
}

#[test]
fn test_per_epoch_reference_and_horizon() {
    let dir = TempDir::new().unwrap();
    let mut run1 = DeltaPatternRegularizer::new(DeltaPatternConfig::default());
    let start = named(&[("w", t(&[0.0]))]);
    run1.capture_weights(&refs(&start)).unwrap();
    for epoch in 0..3 {
        let now = named(&[("w", t(&[epoch as f32 + 1.0]))]);
        assert_eq!(run1.record_epoch_delta(&refs(&now), epoch).unwrap(), 1);
    }
    assert_eq!(run1.recorded_epochs(), vec![0, 1, 2]);
    let path = run1.save_pattern(&refs(&named(&[("w", t(&[3.0]))])), dir.path(), "per_epoch").unwrap();

    let mut reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default().with_lambda(1.0));
    assert!(reg.load_reference_pattern(&path));
    assert_eq!(reg.reference().max_epoch(), Some(2));
    reg.capture_initial_weights_run2(&refs(&start)).unwrap();

    let now = named(&[("w", t(&[2.0]))]);
    // Epoch 1 reference delta is 2: exact match.
    assert_eq!(reg.penalty(&refs(&now), &at_epoch(1), None), 0.0);
    // Epoch 0 reference delta is 1.
    assert_relative_eq!(reg.penalty(&refs(&now), &at_epoch(0), None), 1.0);
    // Past the recorded horizon.
    assert_eq!(reg.penalty(&refs(&now), &at_epoch(3), None), 0.0);
}

#[test]
fn test_final_deltas_close_per_epoch_pattern() {
    let dir = TempDir::new().unwrap();
    let mut run1 = DeltaPatternRegularizer::new(DeltaPatternConfig::default());
    run1.capture_weights(&refs(&named(&[("w", t(&[0.0]))]))).unwrap();
    run1.record_epoch_delta(&refs(&named(&[("w", t(&[1.0]))])), 0).unwrap();

    // Weights kept moving after the last recorded epoch.
    let path = run1.save_pattern(&refs(&named(&[("w", t(&[5.0]))])), dir.path(), "closing").unwrap();
    let saved = ReferencePattern::load(&path).unwrap();
    assert_eq!(saved.epochs(), vec![0, 1]);
    assert_eq!(saved.for_epoch(0).unwrap()["w"].to_vec(), vec![1.0]);
    assert_eq!(saved.for_epoch(1).unwrap()["w"].to_vec(), vec![5.0]);

    let log = std::fs::read_to_string(dir.path().join("closing.log")).unwrap();
    assert!(log.contains("epochs saved: 2"));
}

#[test]
fn test_record_without_run1_snapshot_is_skipped() {
    let mut reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default());
    let params = named(&[("w", t(&[1.0]))]);
    assert_eq!(reg.record_epoch_delta(&refs(&params), 0).unwrap(), 0);
    assert!(reg.recorded_epochs().is_empty());
}

#[test]
fn test_device_cache_is_partial_and_transparent() {
    let dir = TempDir::new().unwrap();
    let path = saved_flat_pattern(&dir);
    // Room for 1-element tensors only.
    let config = DeltaPatternConfig::default().with_reference(&path).with_cache_device(Device::accelerator_with_limit(0, 4));
    let mut reg = DeltaPatternRegularizer::new(config);
    let start = named(&[("w", t(&[0.0, 0.0])), ("b", t(&[0.0]))]);
    reg.capture_initial_weights_run2(&refs(&start)).unwrap();

    let now = named(&[("w", t(&[2.0, 2.0])), ("b", t(&[1.0]))]);
    let before = reg.compute_penalty(&refs(&now), 1.0, &at_epoch(0), None);

    let report = reg.cache_on_device();
    assert_eq!(report, CacheReport { expected: 4, cached: 2 });
    assert!(!report.is_complete());
    assert_eq!(reg.compute_penalty(&refs(&now), 1.0, &at_epoch(0), None), before);
}

#[test]
fn test_mismatched_shapes_are_not_compared() {
    let dir = TempDir::new().unwrap();
    let path = saved_flat_pattern(&dir);
    let mut reg = DeltaPatternRegularizer::new(DeltaPatternConfig::default().with_reference(&path));
    let start = named(&[("w", t(&[0.0, 0.0, 0.0]))]);
    reg.capture_initial_weights_run2(&refs(&start)).unwrap();
    let now = named(&[("w", t(&[1.0, 1.0, 1.0]))]);
    assert_eq!(reg.compute_penalty(&refs(&now), 1.0, &at_epoch(0), None), 0.0);
}
