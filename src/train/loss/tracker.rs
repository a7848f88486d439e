//! Rolling statistics of the loss components

use super::components::{LossComponent, LossComponents};
use super::config::StatsMode;
use serde::Serialize;
use std::collections::VecDeque;

/// Smallest scale ever returned, so z-scores never divide by zero.
pub const MIN_SCALE: f64 = 1e-8;

/// Bounded window of per-step value batches.
///
/// Each entry holds every value pushed in one `update`; the oldest entry is
/// evicted once `capacity` entries are stored.
#[derive(Debug, Clone, PartialEq)]
pub struct LossWindow {
    capacity: usize,
    entries: VecDeque<Vec<f64>>,
}

impl LossWindow {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: VecDeque::with_capacity(capacity.max(1)) }
    }

    pub fn push(&mut self, values: &[f64]) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(values.to_vec());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All stored values, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().flatten().copied().collect()
    }

    /// `(center, scale)` of the stored values.
    ///
    /// `(0.0, MIN_SCALE)` until at least two entries are stored.
    pub fn stats(&self, mode: StatsMode) -> (f64, f64) {
        let values = self.values();
        if self.entries.len() < 2 || values.is_empty() {
            return (0.0, MIN_SCALE);
        }
        match mode {
            StatsMode::MeanStd => {
                let (mean, std) = mean_std(&values);
                (mean, std.max(MIN_SCALE))
            }
            StatsMode::MedianMad => {
                let (median, mad) = median_mad(values);
                (median, mad.max(MIN_SCALE))
            }
        }
    }
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Median of `values`; the midpoint of the two middle values for even lengths.
fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Median and raw median absolute deviation.
pub fn median_mad(values: Vec<f64>) -> (f64, f64) {
    let center = median(values.clone());
    let deviations = values.into_iter().map(|v| (v - center).abs()).collect();
    (center, median(deviations))
}

/// Z-scores of the three components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ZScores {
    pub mse: f64,
    pub mae: f64,
    pub log_cosh: f64,
}

impl ZScores {
    pub fn to_array(self) -> [f64; 3] {
        [self.mse, self.mae, self.log_cosh]
    }

    pub fn from_array([mse, mae, log_cosh]: [f64; 3]) -> Self {
        Self { mse, mae, log_cosh }
    }
}

/// Rolling windows of MSE, MAE and log-cosh values.
///
/// Sequencing contract: [`LossTracker::compute_z_scores`] uses the windows as
/// they are at call time. To score a batch against the history that precedes
/// it, call `compute_z_scores` first and `update` second.
#[derive(Debug, Clone, PartialEq)]
pub struct LossTracker {
    mode: StatsMode,
    windows: [LossWindow; 3],
}

impl LossTracker {
    pub fn new(window_size: usize, mode: StatsMode) -> Self {
        Self {
            mode,
            windows: [LossWindow::new(window_size), LossWindow::new(window_size), LossWindow::new(window_size)],
        }
    }

    pub fn mode(&self) -> StatsMode {
        self.mode
    }

    pub fn window(&self, component: LossComponent) -> &LossWindow {
        &self.windows[component.index()]
    }

    /// Push one step's (possibly per-sample) values onto each window.
    pub fn update(&mut self, mse: &[f64], mae: &[f64], log_cosh: &[f64]) {
        self.windows[0].push(mse);
        self.windows[1].push(mae);
        self.windows[2].push(log_cosh);
    }

    pub fn update_components(&mut self, components: &LossComponents) {
        self.update(&components.mse, &components.mae, &components.log_cosh);
    }

    /// `(center, scale)` of one component's window.
    pub fn compute_stats(&self, component: LossComponent) -> (f64, f64) {
        self.window(component).stats(self.mode)
    }

    /// `(value - center) / scale` per component, against the current windows.
    pub fn compute_z_scores(&self, mse: f64, mae: f64, log_cosh: f64) -> ZScores {
        let z = |component: LossComponent, value: f64| {
            let (center, scale) = self.compute_stats(component);
            (value - center) / scale
        };
        ZScores {
            mse: z(LossComponent::Mse, mse),
            mae: z(LossComponent::Mae, mae),
            log_cosh: z(LossComponent::LogCosh, log_cosh),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn window_of(values: &[f64]) -> LossWindow {
        let mut w = LossWindow::new(100);
        for v in values {
            w.push(&[*v]);
        }
        w
    }

    #[test]
    fn test_stats_need_two_entries() {
        assert_eq!(window_of(&[]).stats(StatsMode::MeanStd), (0.0, 1e-8));
        assert_eq!(window_of(&[5.0]).stats(StatsMode::MeanStd), (0.0, 1e-8));
        assert_eq!(window_of(&[5.0]).stats(StatsMode::MedianMad), (0.0, 1e-8));
    }

    #[test]
    fn test_mean_std_of_literal_window() {
        let (center, scale) = window_of(&[1.0, 2.0, 3.0]).stats(StatsMode::MeanStd);
        assert_relative_eq!(center, 2.0);
        assert_relative_eq!(scale, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(scale, 0.8165, epsilon = 1e-4);
    }

    #[test]
    fn test_median_mad() {
        let (center, scale) = window_of(&[1.0, 2.0, 3.0, 10.0]).stats(StatsMode::MedianMad);
        assert_relative_eq!(center, 2.5);
        // deviations 1.5, 0.5, 0.5, 7.5
        assert_relative_eq!(scale, 1.0);
    }

    #[test]
    fn test_constant_window_scale_is_floored() {
        let (center, scale) = window_of(&[4.0, 4.0, 4.0]).stats(StatsMode::MeanStd);
        assert_eq!(center, 4.0);
        assert_eq!(scale, MIN_SCALE);
    }

    #[test]
    fn test_entries_are_flattened_and_evicted() {
        let mut w = LossWindow::new(2);
        w.push(&[1.0, 2.0]);
        w.push(&[3.0]);
        w.push(&[4.0, 5.0]);
        assert_eq!(w.len(), 2);
        assert_eq!(w.values(), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_z_scores_use_history_before_update() {
        let mut tracker = LossTracker::new(10, StatsMode::MeanStd);
        tracker.update(&[1.0], &[1.0], &[1.0]);
        tracker.update(&[3.0], &[3.0], &[3.0]);

        let z = tracker.compute_z_scores(4.0, 2.0, 0.0);
        assert_relative_eq!(z.mse, 2.0);
        assert_relative_eq!(z.mae, 0.0);
        assert_relative_eq!(z.log_cosh, -2.0);

        tracker.update(&[4.0], &[2.0], &[0.0]);
        assert_ne!(tracker.compute_z_scores(4.0, 2.0, 0.0), z);
    }

    proptest! {
        #[test]
        fn prop_scale_is_never_below_floor(
            values in prop::collection::vec(-1e3f64..1e3, 0..40),
            median_mode in any::<bool>(),
        ) {
            let mode = if median_mode { StatsMode::MedianMad } else { StatsMode::MeanStd };
            let (_, scale) = window_of(&values).stats(mode);
            prop_assert!(scale >= MIN_SCALE);
        }

        #[test]
        fn prop_window_never_exceeds_capacity(cap in 1usize..10, pushes in 0usize..30) {
            let mut w = LossWindow::new(cap);
            for i in 0..pushes {
                w.push(&[i as f64]);
            }
            prop_assert_eq!(w.len(), pushes.min(cap));
        }
    }
}
