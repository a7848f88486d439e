//! Delta-pattern regularization across training runs

mod config;
mod pattern;
mod regularizer;
mod summary;

#[cfg(test)]
mod tests;

pub use config::{DeltaMetric, DeltaPatternConfig};
pub use pattern::{epoch_key, split_epoch_key, DeltaMap, ReferencePattern};
pub use regularizer::{CacheReport, DeltaNorms, DeltaPatternRegularizer};
pub use summary::{DeltaSummary, TOP_N};
