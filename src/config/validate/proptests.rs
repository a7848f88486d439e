//! Property-based tests for configuration validation

use super::error::ValidationError;
use super::validator::validate_spec;
use crate::config::TrainSpec;
use crate::peft::{PeftConfig, PresetTable};
use crate::train::delta::DeltaPatternConfig;
use crate::train::loss::{DynamicLossConfig, StatsMode};
use proptest::prelude::*;

fn arb_valid_spec() -> impl Strategy<Value = TrainSpec> {
    (
        1usize..256,                          // rank
        1e-3f32..64.0,                        // alpha
        0.0f32..=1.0,                         // dropout
        2usize..500,                          // window_size
        1e-3f64..10.0,                        // outlier_threshold
        proptest::option::of(0.0f64..0.999), // ema_decay
        0.0f64..10.0,                         // lambda
        any::<bool>(),                        // median/MAD statistics
    )
        .prop_map(|(rank, alpha, dropout, window, threshold, ema, lambda, median)| {
            let mut loss = DynamicLossConfig::default()
                .with_window_size(window)
                .with_outlier_threshold(threshold)
                .with_stats_mode(if median { StatsMode::MedianMad } else { StatsMode::MeanStd });
            if let Some(decay) = ema {
                loss = loss.with_ema_decay(decay);
            }
            TrainSpec {
                peft: PeftConfig::new(rank, alpha).with_dropout(dropout),
                preset_file: None,
                dynamic_loss: Some(loss),
                delta_pattern: Some(DeltaPatternConfig::default().with_lambda(lambda)),
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_valid_spec_passes(spec in arb_valid_spec()) {
        prop_assert!(validate_spec(&spec, &PresetTable::builtin()).is_ok());
    }

    #[test]
    fn prop_short_window_fails(spec in arb_valid_spec(), window in 0usize..2) {
        let mut spec = spec;
        spec.dynamic_loss = spec.dynamic_loss.map(|c| c.with_window_size(window));
        let result = validate_spec(&spec, &PresetTable::builtin());
        prop_assert!(matches!(result, Err(ValidationError::InvalidWindowSize(w)) if w == window));
    }

    #[test]
    fn prop_negative_lambda_fails(spec in arb_valid_spec(), lambda in -100.0f64..-1e-6) {
        let mut spec = spec;
        spec.delta_pattern = Some(DeltaPatternConfig::default().with_lambda(lambda));
        let result = validate_spec(&spec, &PresetTable::builtin());
        prop_assert!(matches!(result, Err(ValidationError::InvalidLambda(_))));
    }

    #[test]
    fn prop_zero_rank_fails(spec in arb_valid_spec()) {
        let mut spec = spec;
        spec.peft.rank = 0;
        prop_assert!(matches!(
            validate_spec(&spec, &PresetTable::builtin()),
            Err(ValidationError::Peft(_))
        ));
    }

    #[test]
    fn prop_dropout_out_of_range_fails(spec in arb_valid_spec(), dropout in 1.001f32..10.0) {
        let mut spec = spec;
        spec.peft.dropout = dropout;
        prop_assert!(matches!(
            validate_spec(&spec, &PresetTable::builtin()),
            Err(ValidationError::Peft(crate::Error::InvalidArgument(_)))
        ));
    }
}
