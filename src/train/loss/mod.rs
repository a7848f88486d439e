//! Dynamic loss weighting
//!
//! - [`LossComponents`] - per-sample MSE, MAE and log-cosh of a batch
//! - [`LossTracker`] - rolling windows and z-scores per component
//! - [`DynamicLossStrength`] - z-scores to weights (clamp, invert, normalize, smooth, schedule)
//! - [`DynamicLossWeighting`] - the three above wired into one training step

mod components;
mod config;
mod strength;
mod tracker;
mod weighting;


pub use components::{LossComponent, LossComponents, LossWeights};
pub use config::{ComponentSchedules, DynamicLossConfig, Schedule, StatsMode};
pub use strength::DynamicLossStrength;
pub use tracker::{mean_std, median_mad, LossTracker, LossWindow, ZScores, MIN_SCALE};
pub use weighting::{DynamicLossWeighting, WeightedLoss};
