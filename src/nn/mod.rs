//! Frozen base-model layers
//!
//! The adapter system only needs two things from the backend: the two layer
//! kinds it wraps (dense and grid convolution) with their forward primitives,
//! and a way to enumerate named submodules. Everything else is opaque.

mod conv;
mod dropout;
mod layer;
mod linear;
mod model;

#[cfg(test)]
mod tests;

pub use conv::{conv2d, Conv2d, Conv2dParams};
pub use dropout::dropout;
pub use layer::{Layer, LayerKind, LayerShape, LayerSpec};
pub use linear::{linear, Linear};
pub use model::{BaseModel, FrozenModel};

pub(crate) use conv::kernel_dims;
pub(crate) use linear::{as_matrix, matrix_dims};

use crate::error::Result;
use crate::Tensor;

/// Anything that maps an input tensor to an output tensor.
///
/// Implemented by base layers and by adapters, so a call site can pick either
/// one without knowing which it holds.
pub trait Forward {
    fn forward(&self, x: &Tensor) -> Result<Tensor>;
}
