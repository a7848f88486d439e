//! Low-rank adapter: `y = base(x) + up(down(dropout(x))) * alpha / rank`
//!
//! For a dense layer `down` is `[rank, in]` and `up` is `[out, rank]`.
//! For a grid convolution `down` is a `[rank, in, kh, kw]` convolution with
//! the base layer's stride, padding and dilation (never grouped) and `up` is
//! a pointwise `[out, rank, 1, 1]` projection.
//!
//! `up` starts at zero, so a fresh adapter reproduces the base layer exactly.

use super::core::{add_scaled, kaiming_uniform, AdapterCore, AdapterFactors};
use super::AdapterVariant;
use crate::error::Result;
use crate::nn::{as_matrix, conv2d, linear, Conv2dParams, Forward, Layer, LayerShape};
use crate::peft::keys;
use crate::Tensor;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct LoraFactors {
    pub down: Tensor,
    pub up: Tensor,
}

pub(crate) fn down_shape(shape: &LayerShape, rank: usize) -> Vec<usize> {
    match shape {
        LayerShape::Dense { in_features, .. } => vec![rank, *in_features],
        LayerShape::GridConv { in_channels, kernel_size, .. } => {
            vec![rank, *in_channels, kernel_size.0, kernel_size.1]
        }
    }
}

pub(crate) fn up_shape(shape: &LayerShape, rank: usize) -> Vec<usize> {
    match shape {
        LayerShape::Dense { out_features, .. } => vec![*out_features, rank],
        LayerShape::GridConv { out_channels, .. } => vec![*out_channels, rank, 1, 1],
    }
}

/// Shape of the base weight when it is not grouped.
pub(crate) fn full_weight_shape(shape: &LayerShape) -> Vec<usize> {
    match shape {
        LayerShape::Dense { in_features, out_features } => vec![*out_features, *in_features],
        LayerShape::GridConv { in_channels, out_channels, kernel_size, .. } => {
            vec![*out_channels, *in_channels, kernel_size.0, kernel_size.1]
        }
    }
}

/// `up · down` reshaped to the (ungrouped) base weight shape.
pub(crate) fn low_rank_delta(down: &Tensor, up: &Tensor, shape: &LayerShape, rank: usize) -> Result<Tensor> {
    let out = shape.out_features();
    let fan_in = shape.fan_in();
    let up2 = up.reshape(&[out, rank])?;
    let down2 = down.reshape(&[rank, fan_in])?;
    let product = as_matrix(&up2, keys::LORA_UP)?.dot(&as_matrix(&down2, keys::LORA_DOWN)?);
    Tensor::new(product.into_dyn()).reshape(&full_weight_shape(shape))
}

impl LoraFactors {
    pub(crate) fn init<R: Rng + ?Sized>(shape: &LayerShape, rank: usize, rng: &mut R) -> Result<Self> {
        Ok(Self {
            down: kaiming_uniform(&down_shape(shape, rank), shape.fan_in(), rng)?,
            up: Tensor::zeros(&up_shape(shape, rank)),
        })
    }

    /// `up(down(x))` without scaling.
    pub(crate) fn project(&self, shape: &LayerShape, x: &Tensor) -> Result<Tensor> {
        match shape {
            LayerShape::Dense { .. } => linear(&linear(x, &self.down, None)?, &self.up, None),
            LayerShape::GridConv { params, .. } => {
                let hidden = conv2d(x, &self.down, None, params.ungrouped())?;
                conv2d(&hidden, &self.up, None, Conv2dParams::pointwise())
            }
        }
    }
}

impl AdapterFactors for LoraFactors {
    const VARIANT: AdapterVariant = AdapterVariant::Lora;
    const FIELDS: &'static [&'static str] = &[keys::LORA_DOWN, keys::LORA_UP];

    fn shapes(shape: &LayerShape, rank: usize) -> Vec<Vec<usize>> {
        vec![down_shape(shape, rank), up_shape(shape, rank)]
    }

    fn initialize<R: Rng + ?Sized>(_layer: &Layer, shape: &LayerShape, rank: usize, rng: &mut R) -> Result<Self> {
        Self::init(shape, rank, rng)
    }

    fn tensors(&self) -> Vec<&Tensor> {
        vec![&self.down, &self.up]
    }

    fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.down, &mut self.up]
    }

    fn forward(&self, core: &AdapterCore, shape: &LayerShape, x: &Tensor) -> Result<Tensor> {
        let base = core.layer().forward(x)?;
        let delta = self.project(shape, &core.drop_input(x))?;
        add_scaled(base, &delta, core.scale())
    }
}
