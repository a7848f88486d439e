//! Training-loop companions
//!
//! Nothing here drives training. The external loop owns the optimizer and
//! the forward/backward pass, and calls into these components once per step:
//!
//! - [`loss::DynamicLossWeighting`] weights MSE, MAE and log-cosh by their recent behavior
//! - [`delta::DeltaPatternRegularizer`] penalizes straying from an earlier run's weight deltas
//! - [`CheckpointManager`] tags checkpointed calls within a step
//! - [`MetricsSink`] receives the scalars they report

mod checkpoint;
pub mod delta;
pub mod loss;
mod metrics;
mod progress;

pub use checkpoint::{CallTag, CheckpointManager};
pub use metrics::{MemorySink, MetricsSink};
pub use progress::{epoch_fraction, TrainProgress};
