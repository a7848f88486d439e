//! Declarative fine-tuning configuration
//!
//! A [`TrainSpec`] bundles the adapter, loss weighting and delta penalty
//! settings. [`load_spec`] reads it from YAML or JSON and validates it.

mod loader;
mod schema;
mod validate;

pub use loader::load_spec;
pub use schema::TrainSpec;
pub use validate::{
    validate_delta_pattern, validate_dynamic_loss, validate_peft, validate_spec, ValidationError,
};
