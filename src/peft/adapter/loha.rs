//! Hadamard-product adapter
//!
//! `ΔW = (w1_a · w1_b) ⊙ (w2_a · w2_b)`, reshaped to the base weight and
//! applied with the base layer's own primitive (grouping included):
//! `y = base(x) + op(dropout(x), ΔW · alpha / rank)`.
//! `w2_a` starts at zero, which zeroes the whole product.

use super::core::{add_scaled, normal, AdapterCore, AdapterFactors};
use super::AdapterVariant;
use crate::error::Result;
use crate::nn::{as_matrix, conv2d, linear, Forward, Layer, LayerShape};
use crate::peft::keys;
use crate::Tensor;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct LohaFactors {
    pub w1_a: Tensor,
    pub w1_b: Tensor,
    pub w2_a: Tensor,
    pub w2_b: Tensor,
}

/// Columns of the flattened base weight (`in / groups · kh · kw` for convolutions).
fn weight_columns(shape: &LayerShape) -> usize {
    match shape {
        LayerShape::Dense { in_features, .. } => *in_features,
        LayerShape::GridConv { in_channels, kernel_size, params, .. } => {
            in_channels / params.groups.max(1) * kernel_size.0 * kernel_size.1
        }
    }
}

fn weight_shape(shape: &LayerShape) -> Vec<usize> {
    match shape {
        LayerShape::Dense { in_features, out_features } => vec![*out_features, *in_features],
        LayerShape::GridConv { in_channels, out_channels, kernel_size, params } => vec![
            *out_channels,
            in_channels / params.groups.max(1),
            kernel_size.0,
            kernel_size.1,
        ],
    }
}

impl LohaFactors {
    /// The unscaled weight delta in the base weight's shape.
    pub fn delta(&self, shape: &LayerShape) -> Result<Tensor> {
        let first = as_matrix(&self.w1_a, keys::HADA_W1_A)?.dot(&as_matrix(&self.w1_b, keys::HADA_W1_B)?);
        let second = as_matrix(&self.w2_a, keys::HADA_W2_A)?.dot(&as_matrix(&self.w2_b, keys::HADA_W2_B)?);
        Tensor::new((first * second).into_dyn()).reshape(&weight_shape(shape))
    }
}

impl AdapterFactors for LohaFactors {
    const VARIANT: AdapterVariant = AdapterVariant::Loha;
    const FIELDS: &'static [&'static str] = &[keys::HADA_W1_A, keys::HADA_W1_B, keys::HADA_W2_A, keys::HADA_W2_B];

    fn shapes(shape: &LayerShape, rank: usize) -> Vec<Vec<usize>> {
        let out = shape.out_features();
        let cols = weight_columns(shape);
        vec![vec![out, rank], vec![rank, cols], vec![out, rank], vec![rank, cols]]
    }

    fn initialize<R: Rng + ?Sized>(_layer: &Layer, shape: &LayerShape, rank: usize, rng: &mut R) -> Result<Self> {
        let out = shape.out_features();
        let cols = weight_columns(shape);
        Ok(Self {
            w1_a: normal(&[out, rank], 0.1, rng)?,
            w1_b: normal(&[rank, cols], 1.0, rng)?,
            w2_a: Tensor::zeros(&[out, rank]),
            w2_b: normal(&[rank, cols], 1.0, rng)?,
        })
    }

    fn tensors(&self) -> Vec<&Tensor> {
        vec![&self.w1_a, &self.w1_b, &self.w2_a, &self.w2_b]
    }

    fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.w1_a, &mut self.w1_b, &mut self.w2_a, &mut self.w2_b]
    }

    fn forward(&self, core: &AdapterCore, shape: &LayerShape, x: &Tensor) -> Result<Tensor> {
        let base = core.layer().forward(x)?;
        let delta = self.delta(shape)?;
        let input = core.drop_input(x);
        let contribution = match shape {
            LayerShape::Dense { .. } => linear(&input, &delta, None)?,
            LayerShape::GridConv { params, .. } => conv2d(&input, &delta, None, *params)?,
        };
        add_scaled(base, &contribution, core.scale())
    }
}
