//! Training progress counters supplied by the external training loop

use serde::{Deserialize, Serialize};

/// Where the training loop currently is.
///
/// Epochs are 0-indexed. `global_step` counts optimizer steps since the start
/// of the run and is the step reported to metrics sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainProgress {
    pub epoch: usize,
    pub epoch_step: usize,
    pub global_step: usize,
    pub total_epochs: usize,
}

impl TrainProgress {
    pub fn new(total_epochs: usize) -> Self {
        Self { total_epochs, ..Self::default() }
    }

    /// Advance one optimizer step.
    pub fn step(&mut self) {
        self.epoch_step += 1;
        self.global_step += 1;
    }

    /// Move to the next epoch and reset the in-epoch counter.
    pub fn next_epoch(&mut self) {
        self.epoch += 1;
        self.epoch_step = 0;
    }

    /// Fraction of the run completed at the start of the current epoch, in `[0, 1]`.
    ///
    /// 0 when the run has at most one epoch.
    pub fn epoch_fraction(&self) -> f64 {
        epoch_fraction(self.epoch, self.total_epochs)
    }
}

/// `epoch / (total_epochs - 1)` clamped to `[0, 1]`; 0 for `total_epochs <= 1`.
pub fn epoch_fraction(epoch: usize, total_epochs: usize) -> f64 {
    if total_epochs <= 1 {
        return 0.0;
    }
    (epoch as f64 / (total_epochs - 1) as f64).clamp(0.0, 1.0)
}
