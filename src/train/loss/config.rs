//! Dynamic loss weighting configuration

use super::components::LossComponent;
use serde::{Deserialize, Serialize};

/// How a window is summarized into `(center, scale)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsMode {
    /// Mean and population standard deviation
    #[default]
    MeanStd,
    /// Median and median absolute deviation
    MedianMad,
}

/// Linear per-epoch factor from `start` (first epoch) to `end` (last epoch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub start: f64,
    pub end: f64,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::constant(1.0)
    }
}

impl Schedule {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(value, value)
    }

    /// `start * (1 - frac) + end * frac`.
    pub fn at(&self, frac: f64) -> f64 {
        self.start * (1.0 - frac) + self.end * frac
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComponentSchedules {
    pub mse: Schedule,
    pub mae: Schedule,
    pub log_cosh: Schedule,
}

impl ComponentSchedules {
    pub fn get(&self, component: LossComponent) -> Schedule {
        match component {
            LossComponent::Mse => self.mse,
            LossComponent::Mae => self.mae,
            LossComponent::LogCosh => self.log_cosh,
        }
    }
}

fn default_window_size() -> usize {
    100
}

fn default_outlier_threshold() -> f64 {
    3.0
}

/// Settings for [`super::DynamicLossWeighting`].
///
/// ```yaml
/// window_size: 100
/// stats_mode: median_mad
/// outlier_threshold: 3.0
/// ema_decay: 0.9
/// schedules:
///   mse: { start: 1.0, end: 0.5 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicLossConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub stats_mode: StatsMode,
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ema_decay: Option<f64>,
    #[serde(default)]
    pub schedules: ComponentSchedules,
}

impl Default for DynamicLossConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            stats_mode: StatsMode::default(),
            outlier_threshold: default_outlier_threshold(),
            ema_decay: None,
            schedules: ComponentSchedules::default(),
        }
    }
}

impl DynamicLossConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_stats_mode(mut self, mode: StatsMode) -> Self {
        self.stats_mode = mode;
        self
    }

    pub fn with_outlier_threshold(mut self, threshold: f64) -> Self {
        self.outlier_threshold = threshold;
        self
    }

    pub fn with_ema_decay(mut self, decay: f64) -> Self {
        self.ema_decay = Some(decay);
        self
    }

    pub fn with_schedule(mut self, component: LossComponent, schedule: Schedule) -> Self {
        match component {
            LossComponent::Mse => self.schedules.mse = schedule,
            LossComponent::Mae => self.schedules.mae = schedule,
            LossComponent::LogCosh => self.schedules.log_cosh = schedule,
        }
        self
    }
}
