//! Integration tests for a config-driven fine-tuning flow across two runs

use afinar::config::load_spec;
use afinar::nn::{FrozenModel, Linear};
use afinar::peft::AdapterWrapper;
use afinar::train::delta::{DeltaPatternRegularizer, ReferencePattern};
use afinar::train::loss::{DynamicLossWeighting, LossComponent, LossComponents};
use afinar::train::{CheckpointManager, MemorySink, MetricsSink, TrainProgress};
use afinar::Tensor;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SPEC: &str = r#"
peft:
  peft_type: LORA
  rank: 2
  alpha: 2.0
  layer_preset: attn-only
  seed: 1
dynamic_loss:
  window_size: 4
  stats_mode: median_mad
delta_pattern:
  metric: mse
  lambda: 1.0
"#;

fn linear(out: usize, inp: usize, seed: f32) -> Linear {
    let data = (0..out * inp).map(|i| ((i as f32 + seed) * 0.29).cos()).collect();
    Linear::new(Tensor::from_vec(data, &[out, inp]).expect("valid shape"), None).expect("valid linear")
}

fn unet() -> FrozenModel {
    FrozenModel::new()
        .with_layer("mid.attn1.to_q", linear(6, 6, 0.0))
        .with_layer("mid.attn1.to_k", linear(6, 6, 1.0))
        .with_layer("mid.resnets.0", linear(6, 6, 2.0))
}

fn build(spec_path: &Path) -> (afinar::config::TrainSpec, AdapterWrapper) {
    let spec = load_spec(spec_path).expect("spec loads");
    let presets = spec.preset_table().expect("presets resolve");
    let mut wrapper = AdapterWrapper::new(&unet(), "lora_unet", &spec.peft, &presets).expect("wrapper builds");
    wrapper.initialize_weights(None).expect("init succeeds");
    (spec, wrapper)
}

/// Stand-in for one optimizer update on every `lora_up`.
fn nudge(wrapper: &mut AdapterWrapper, by: f32) {
    for (key, param) in wrapper.named_parameters_mut() {
        if key.ends_with("lora_up.weight") {
            param.data_mut().mapv_inplace(|v| v + by);
        }
    }
}

#[test]
fn test_pattern_from_first_run_guides_second() {
    let dir = TempDir::new().expect("temp dir");
    let spec_path = dir.path().join("spec.yaml");
    fs::write(&spec_path, SPEC).expect("write spec");

    // Run 1: record one delta per epoch, then save the pattern.
    let (spec, mut run1) = build(&spec_path);
    assert_eq!(run1.len(), 2);
    let mut recorder = DeltaPatternRegularizer::new(spec.delta_pattern.clone().expect("delta config"));
    assert_eq!(recorder.capture_weights(&run1.named_parameters()).expect("capture"), 4);
    for epoch in 0..2 {
        nudge(&mut run1, 0.1);
        assert_eq!(recorder.record_epoch_delta(&run1.named_parameters(), epoch).expect("record"), 4);
    }
    let pattern_path = recorder.save_pattern(&run1.named_parameters(), dir.path(), "run1").expect("save");
    assert!(pattern_path.exists());
    assert!(pattern_path.with_extension("log").exists());

    // Run 2: same seed, guided by the run-1 pattern.
    let (spec, mut run2) = build(&spec_path);
    let config = spec.delta_pattern.clone().expect("delta config").with_reference(&pattern_path);
    let mut guide = DeltaPatternRegularizer::new(config);
    assert!(guide.has_reference());
    assert!(matches!(guide.reference(), ReferencePattern::PerEpoch(_)));
    assert_eq!(guide.reference().epochs(), vec![0, 1]);
    guide.capture_initial_weights_run2(&run2.named_parameters()).expect("capture");

    let mut progress = TrainProgress::new(4);
    let before = guide.penalty(&run2.named_parameters(), &progress, None);
    assert!(before > 0.0);

    nudge(&mut run2, 0.1);
    let mut sink = MemorySink::new();
    let matched = guide.penalty(&run2.named_parameters(), &progress, Some(&mut sink as &mut dyn MetricsSink));
    assert!(matched < 1e-10, "penalty {matched}");
    assert_eq!(sink.series("delta/penalty").len(), 1);

    // Epoch 1 expects twice the update; epoch 2 is past the pattern.
    progress.next_epoch();
    assert!(guide.penalty(&run2.named_parameters(), &progress, None) > 0.0);
    progress.next_epoch();
    assert_eq!(guide.penalty(&run2.named_parameters(), &progress, None), 0.0);
}

#[test]
fn test_loss_weighting_over_a_run() {
    let dir = TempDir::new().expect("temp dir");
    let spec_path = dir.path().join("spec.yaml");
    fs::write(&spec_path, SPEC).expect("write spec");
    let spec = load_spec(&spec_path).expect("spec loads");

    let mut engine = DynamicLossWeighting::new(spec.dynamic_loss.expect("loss config")).expect("engine builds");
    let mut checkpoints = CheckpointManager::new(true);
    let mut sink = MemorySink::new();
    let mut progress = TrainProgress::new(2);

    let target = Tensor::zeros(&[4, 3]);
    let mut steps = 0;
    for epoch in 0..2 {
        for i in 0..5 {
            checkpoints.begin_step(progress.global_step);
            let scale = if epoch == 1 && i == 4 { 25.0 } else { 1.0 + 0.05 * i as f32 };
            let pred = Tensor::from_vec((0..12).map(|j| scale * (j as f32 * 0.37).sin()).collect(), &[4, 3])
                .expect("valid shape");
            let components = checkpoints
                .run(|_| LossComponents::compute(&pred, &target))
                .expect("components");
            let out = engine.step(&components, &progress, Some(&mut sink as &mut dyn MetricsSink));

            assert!(out.loss.is_finite());
            assert!((out.weights.sum() - 1.0).abs() < 1e-9);
            for c in LossComponent::ALL {
                assert!(out.weights.get(c) >= 0.0);
            }
            assert!(out.z_scores.to_array().iter().all(|z| z.is_finite()));
            assert_eq!(checkpoints.calls(), 1);
            progress.step();
            steps += 1;
        }
        progress.next_epoch();
    }

    assert_eq!(sink.series("loss/weighted").len(), steps);
    assert_eq!(engine.tracker().window(LossComponent::Mse).len(), 4);
}
