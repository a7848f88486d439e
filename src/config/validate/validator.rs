//! Configuration validation logic

use super::error::ValidationError;
use crate::config::schema::TrainSpec;
use crate::peft::{PeftConfig, PresetTable};
use crate::train::delta::DeltaPatternConfig;
use crate::train::loss::{DynamicLossConfig, LossComponent};

/// Validate a training config against a preset table
///
/// Checks:
/// - PEFT hyperparameters, variant combination and glob patterns
/// - The selected preset exists
/// - Loss weighting and delta penalty settings are in range
pub fn validate_spec(spec: &TrainSpec, presets: &PresetTable) -> Result<(), ValidationError> {
    validate_peft(&spec.peft, presets)?;
    if let Some(loss) = &spec.dynamic_loss {
        validate_dynamic_loss(loss)?;
    }
    if let Some(delta) = &spec.delta_pattern {
        validate_delta_pattern(delta)?;
    }
    Ok(())
}

pub fn validate_peft(peft: &PeftConfig, presets: &PresetTable) -> Result<(), ValidationError> {
    peft.validate()?;
    if let Some(name) = &peft.layer_preset {
        if presets.get(name).is_none() {
            return Err(ValidationError::UnknownPreset {
                name: name.clone(),
                available: presets.names().collect::<Vec<_>>().join(", "),
            });
        }
    }
    Ok(())
}

pub fn validate_dynamic_loss(config: &DynamicLossConfig) -> Result<(), ValidationError> {
    if config.window_size < 2 {
        return Err(ValidationError::InvalidWindowSize(config.window_size));
    }
    if !(config.outlier_threshold.is_finite() && config.outlier_threshold > 0.0) {
        return Err(ValidationError::InvalidOutlierThreshold(config.outlier_threshold));
    }
    if let Some(decay) = config.ema_decay {
        if !(0.0..1.0).contains(&decay) {
            return Err(ValidationError::InvalidEmaDecay(decay));
        }
    }

    let mut start_sum = 0.0;
    let mut end_sum = 0.0;
    for component in LossComponent::ALL {
        let s = config.schedules.get(component);
        let valid = |v: f64| v.is_finite() && v >= 0.0;
        if !(valid(s.start) && valid(s.end)) {
            return Err(ValidationError::InvalidSchedule { component, start: s.start, end: s.end });
        }
        start_sum += s.start;
        end_sum += s.end;
    }
    // Non-negative and linear: positive at both ends means positive throughout.
    if start_sum <= 0.0 || end_sum <= 0.0 {
        return Err(ValidationError::ZeroSchedules);
    }
    Ok(())
}

pub fn validate_delta_pattern(config: &DeltaPatternConfig) -> Result<(), ValidationError> {
    if !(config.lambda.is_finite() && config.lambda >= 0.0) {
        return Err(ValidationError::InvalidLambda(config.lambda));
    }
    Ok(())
}
