//! Turning component z-scores into loss weights

use super::components::{LossComponent, LossWeights};
use super::config::DynamicLossConfig;
use super::tracker::ZScores;
use crate::train::progress::epoch_fraction;

const EPS: f64 = 1e-8;

/// Scale `values` to sum to 1; uniform when their sum is not positive.
fn normalize(values: [f64; 3]) -> [f64; 3] {
    let sum: f64 = values.iter().sum();
    if !sum.is_finite() || sum <= EPS {
        return [1.0 / 3.0; 3];
    }
    values.map(|v| v / sum)
}

/// Five-stage weight pipeline: clamp, invert, normalize, smooth, schedule.
///
/// Components whose z-score is small relative to the others get the larger
/// weight. The output is non-negative and sums to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicLossStrength {
    config: DynamicLossConfig,
    ema: Option<[f64; 3]>,
}

impl DynamicLossStrength {
    pub fn new(config: DynamicLossConfig) -> Self {
        Self { config, ema: None }
    }

    pub fn config(&self) -> &DynamicLossConfig {
        &self.config
    }

    /// Smoothed weights before scheduling, once the average has been seeded.
    pub fn ema(&self) -> Option<LossWeights> {
        self.ema.map(LossWeights::from_array)
    }

    pub fn reset(&mut self) {
        self.ema = None;
    }

    /// Per-component schedule factors for `current_epoch`, before normalization.
    pub fn scheduled_factors(&self, total_epochs: usize, current_epoch: usize) -> [f64; 3] {
        let frac = epoch_fraction(current_epoch, total_epochs);
        LossComponent::ALL.map(|c| self.config.schedules.get(c).at(frac))
    }

    pub fn adjust_weights(&mut self, z: ZScores, total_epochs: usize, current_epoch: usize) -> LossWeights {
        let threshold = self.config.outlier_threshold;
        let clamped = z.to_array().map(|v| if v.is_nan() { 0.0 } else { v.abs().min(threshold) });

        let total: f64 = clamped.iter().sum();
        let denom = total.max(EPS);
        let inverted = clamped.map(|c| (total - c) / denom);
        let mut weights = normalize(inverted);

        if let Some(decay) = self.config.ema_decay {
            let smoothed = match self.ema {
                None => weights,
                Some(prev) => [0, 1, 2].map(|i| decay * prev[i] + (1.0 - decay) * weights[i]),
            };
            self.ema = Some(smoothed);
            weights = smoothed;
        }

        let factors = self.scheduled_factors(total_epochs, current_epoch).map(|f| f.max(0.0));
        let scheduled = [0, 1, 2].map(|i| weights[i] * factors[i]);
        let scheduled_sum: f64 = scheduled.iter().sum();
        let out = if scheduled_sum > EPS { normalize(scheduled) } else { normalize(factors) };
        LossWeights::from_array(out)
    }
}
