//! Parameter-efficient adapters and loss shaping for diffusion fine-tuning.
//!
//! This crate provides:
//! - LoRA, DoRA and LoHa adapters attached to the linear and convolution
//!   layers of a frozen model, selected by glob presets and overrides
//! - Checkpoint loading that keeps unrecognized adapter keys as dummies
//!   so they round-trip unchanged
//! - Dynamic weighting of MSE, MAE and log-cosh losses from rolling
//!   z-scores
//! - A delta-pattern penalty that steers a run toward a recorded
//!   weight-update pattern
//!
//! # Example
//!
//! ```no_run
//! use afinar::config::load_spec;
//! use afinar::nn::FrozenModel;
//! use afinar::peft::AdapterWrapper;
//!
//! # fn main() -> afinar::Result<()> {
//! let spec = load_spec("finetune.yaml")?;
//! let presets = spec.preset_table()?;
//! let model = FrozenModel::new();
//! let mut wrapper = AdapterWrapper::new(&model, "lora_unet", &spec.peft, &presets)?;
//! println!("{} adapters, {} failed", wrapper.len(), wrapper.build_report().failures.len());
//! wrapper.initialize_weights(Some(0))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod nn;
pub mod peft;
pub mod tensor;
pub mod train;

pub use error::{Error, ErrorCategory, Result};
pub use tensor::{DType, Device, Tensor};
