//! One training step of dynamic loss weighting

use super::components::{LossComponent, LossComponents, LossWeights};
use super::config::DynamicLossConfig;
use super::strength::DynamicLossStrength;
use super::tracker::{LossTracker, ZScores};
use crate::config::validate_dynamic_loss;
use crate::error::Result;
use crate::train::metrics::{report, MetricsSink};
use crate::train::progress::TrainProgress;
use serde::Serialize;
use tracing::trace;

/// What one [`DynamicLossWeighting::step`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightedLoss {
    pub z_scores: ZScores,
    pub weights: LossWeights,
    /// Weighted sum of the batch-mean components
    pub loss: f64,
}

/// Tracker plus weight pipeline, run in the order the statistics require.
#[derive(Debug, Clone)]
pub struct DynamicLossWeighting {
    tracker: LossTracker,
    strength: DynamicLossStrength,
}

impl DynamicLossWeighting {
    pub fn new(config: DynamicLossConfig) -> Result<Self> {
        validate_dynamic_loss(&config)?;
        Ok(Self { tracker: LossTracker::new(config.window_size, config.stats_mode), strength: DynamicLossStrength::new(config) })
    }

    pub fn tracker(&self) -> &LossTracker {
        &self.tracker
    }

    pub fn strength(&self) -> &DynamicLossStrength {
        &self.strength
    }

    /// Score this batch against the history, record it, then derive weights.
    ///
    /// z-scores come from the windows as they were before this batch; the
    /// batch joins the windows before the weights are computed.
    pub fn step(
        &mut self,
        components: &LossComponents,
        progress: &TrainProgress,
        mut sink: Option<&mut dyn MetricsSink>,
    ) -> WeightedLoss {
        let means = LossComponent::ALL.map(|c| components.mean(c));
        let z_scores = self.tracker.compute_z_scores(means[0], means[1], means[2]);
        self.tracker.update_components(components);
        let weights = self.strength.adjust_weights(z_scores, progress.total_epochs, progress.epoch);
        let loss = weights.combine(components);

        let step = progress.global_step;
        for c in LossComponent::ALL {
            report(&mut sink, &format!("loss/{c}"), means[c.index()], step);
            report(&mut sink, &format!("loss_z/{c}"), z_scores.to_array()[c.index()], step);
            report(&mut sink, &format!("loss_weight/{c}"), weights.get(c), step);
        }
        report(&mut sink, "loss/weighted", loss, step);
        trace!(step, loss, ?weights, "weighted loss");

        WeightedLoss { z_scores, weights, loss }
    }
}
