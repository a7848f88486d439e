//! Weight-decomposed low-rank adapter
//!
//! The effective weight is `W' = W + (alpha / rank) · up · down`, split into
//! a direction `W' / ‖W'‖` (per output channel) and a trainable magnitude
//! `dora_scale`. The layer is then evaluated directly with
//! `dora_scale · W' / ‖W'‖` and the base bias. `dora_scale` starts at `‖W‖`,
//! so a fresh adapter reproduces the base layer.
//!
//! Grouped convolutions are rejected at construction.

use super::core::{add_scaled, channel_shape, AdapterCore, AdapterFactors};
use super::lora::{low_rank_delta, LoraFactors};
use super::AdapterVariant;
use crate::error::{Error, Result};
use crate::nn::{conv2d, linear, Layer, LayerShape};
use crate::peft::keys;
use crate::Tensor;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct DoraFactors {
    pub lora: LoraFactors,
    /// Per-output-channel magnitude, `[out, 1]` or `[out, 1, 1, 1]`
    pub dora_scale: Tensor,
}

/// L2 norm of each output channel (all dimensions but the first).
pub(crate) fn channel_norms(weight: &Tensor) -> Vec<f32> {
    weight
        .data()
        .outer_iter()
        .map(|row| row.iter().map(|&v| f64::from(v) * f64::from(v)).sum::<f64>().sqrt() as f32)
        .collect()
}

fn base_weight<'a>(layer: &'a Layer, shape: &LayerShape) -> Result<&'a Tensor> {
    layer.weight().ok_or_else(|| Error::UnsupportedLayer {
        name: layer.type_name().to_string(),
        reason: format!("{:?} layer has no weight", shape.kind()),
    })
}

impl AdapterFactors for DoraFactors {
    const VARIANT: AdapterVariant = AdapterVariant::Dora;
    const FIELDS: &'static [&'static str] = &[keys::LORA_DOWN, keys::LORA_UP, keys::DORA_SCALE];

    fn check_shape(prefix: &str, shape: &LayerShape) -> Result<()> {
        match shape {
            LayerShape::GridConv { params, .. } if params.groups != 1 => Err(Error::UnsupportedLayer {
                name: prefix.to_string(),
                reason: format!("weight decomposition needs an ungrouped convolution, got groups={}", params.groups),
            }),
            _ => Ok(()),
        }
    }

    fn shapes(shape: &LayerShape, rank: usize) -> Vec<Vec<usize>> {
        let mut shapes = LoraFactors::shapes(shape, rank);
        shapes.push(channel_shape(shape));
        shapes
    }

    fn initialize<R: Rng + ?Sized>(layer: &Layer, shape: &LayerShape, rank: usize, rng: &mut R) -> Result<Self> {
        let norms = channel_norms(base_weight(layer, shape)?);
        Ok(Self {
            lora: LoraFactors::init(shape, rank, rng)?,
            dora_scale: Tensor::from_vec(norms, &channel_shape(shape))?,
        })
    }

    fn tensors(&self) -> Vec<&Tensor> {
        vec![&self.lora.down, &self.lora.up, &self.dora_scale]
    }

    fn tensors_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.lora.down, &mut self.lora.up, &mut self.dora_scale]
    }

    fn forward(&self, core: &AdapterCore, shape: &LayerShape, x: &Tensor) -> Result<Tensor> {
        let layer = core.layer();
        let delta = low_rank_delta(&self.lora.down, &self.lora.up, shape, core.rank())?;
        let combined = add_scaled(base_weight(layer, shape)?.clone(), &delta, core.scale())?;

        let norms = channel_norms(&combined);
        let magnitude = self.dora_scale.to_vec();
        let mut weight = combined.into_data();
        for ((mut row, norm), m) in weight.outer_iter_mut().zip(norms).zip(magnitude) {
            let factor = if norm > 0.0 { m / norm } else { 0.0 };
            row.mapv_inplace(|v| v * factor);
        }
        let weight = Tensor::new(weight);

        let input = core.drop_input(x);
        match shape {
            LayerShape::Dense { .. } => linear(&input, &weight, layer.bias()),
            LayerShape::GridConv { params, .. } => conv2d(&input, &weight, layer.bias(), *params),
        }
    }
}
