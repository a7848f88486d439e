//! Delta pattern regularizer configuration

use crate::tensor::Device;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Distance between the current and the reference delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMetric {
    /// Mean squared difference over all compared elements
    #[default]
    Mse,
    /// `1 - cos(current, reference)` of the stacked vectors
    Cosine,
}

fn default_lambda() -> f64 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeltaPatternConfig {
    #[serde(default)]
    pub metric: DeltaMetric,
    /// Penalty weight
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Pattern saved by an earlier run; no penalty without one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_path: Option<PathBuf>,
    /// Where reference deltas and the run-2 snapshot are cached
    #[serde(default)]
    pub cache_device: Device,
}

impl Default for DeltaPatternConfig {
    fn default() -> Self {
        Self { metric: DeltaMetric::default(), lambda: default_lambda(), reference_path: None, cache_device: Device::Cpu }
    }
}

impl DeltaPatternConfig {
    pub fn with_metric(mut self, metric: DeltaMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_reference(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_path = Some(path.into());
        self
    }

    pub fn with_cache_device(mut self, device: Device) -> Self {
        self.cache_device = device;
        self
    }
}
