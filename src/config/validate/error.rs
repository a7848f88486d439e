//! Validation error types

use crate::train::loss::LossComponent;

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid PEFT config: {0}")]
    Peft(#[from] crate::Error),

    #[error("Unknown layer preset '{name}' (available: {available})")]
    UnknownPreset { name: String, available: String },

    #[error("Invalid window size: {0} (must be >= 2)")]
    InvalidWindowSize(usize),

    #[error("Invalid outlier threshold: {0} (must be > 0.0)")]
    InvalidOutlierThreshold(f64),

    #[error("Invalid EMA decay: {0} (must be in [0.0, 1.0))")]
    InvalidEmaDecay(f64),

    #[error("Invalid {component} schedule: start={start}, end={end} (must be finite and >= 0.0)")]
    InvalidSchedule { component: LossComponent, start: f64, end: f64 },

    #[error("Loss schedules are zero for every component at some epoch")]
    ZeroSchedules,

    #[error("Invalid delta penalty lambda: {0} (must be finite and >= 0.0)")]
    InvalidLambda(f64),
}
