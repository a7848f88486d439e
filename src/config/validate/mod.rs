//! Configuration validation
//!
//! Validates training configs for correctness before any adapter is built.

mod error;
mod validator;

#[cfg(test)]
mod proptests;

pub use error::ValidationError;
pub use validator::{validate_delta_pattern, validate_dynamic_loss, validate_peft, validate_spec};
