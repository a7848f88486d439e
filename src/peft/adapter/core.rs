//! Lifecycle shared by every adapter variant
//!
//! An [`Adapter`] starts as an uninitialized skeleton bound to one frozen
//! layer. Factors appear either through [`Adapter::initialize`] or on the
//! first load that carries matching keys, and never go away again.

use super::AdapterVariant;
use crate::error::{Error, Result};
use crate::nn::{dropout, Forward, Layer, LayerShape};
use crate::peft::config::check_dropout;
use crate::peft::keys;
use crate::peft::state_dict::{partition_prefixed, with_prefix, StateDict};
use crate::tensor::{DType, Device};
use crate::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity and hyperparameters of one adapter, independent of its factors.
#[derive(Debug, Clone)]
pub struct AdapterCore {
    prefix: String,
    layer: Arc<Layer>,
    rank: usize,
    alpha: f32,
    dropout: f32,
    training: bool,
    hooked: bool,
    requires_grad: bool,
    device: Device,
    dtype: DType,
    rng: RefCell<StdRng>,
}

impl AdapterCore {
    fn new(prefix: String, layer: Arc<Layer>, rank: usize, alpha: f32) -> Result<Self> {
        if rank == 0 {
            return Err(Error::ConfigError(format!("adapter '{prefix}' needs a positive rank")));
        }
        if !alpha.is_finite() {
            return Err(Error::ConfigError(format!("adapter '{prefix}' has non-finite alpha {alpha}")));
        }
        Ok(Self {
            prefix,
            layer,
            rank,
            alpha,
            dropout: 0.0,
            training: true,
            hooked: false,
            requires_grad: true,
            device: Device::Cpu,
            dtype: DType::F32,
            rng: RefCell::new(StdRng::seed_from_u64(0)),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn layer(&self) -> &Arc<Layer> {
        &self.layer
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// `alpha / rank`
    pub fn scale(&self) -> f32 {
        self.alpha / self.rank as f32
    }

    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn is_hooked(&self) -> bool {
        self.hooked
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Input after dropout (identity in eval mode or with `p == 0`).
    pub fn drop_input(&self, x: &Tensor) -> Tensor {
        if !self.training || self.dropout == 0.0 {
            return x.clone();
        }
        dropout(x, self.dropout, true, &mut *self.rng.borrow_mut())
    }
}

/// Trainable factors of one adapter variant.
///
/// `FIELDS` names the serialized keys in the same order as
/// [`AdapterFactors::tensors`] returns them.
pub trait AdapterFactors: Clone + fmt::Debug {
    const VARIANT: AdapterVariant;
    const FIELDS: &'static [&'static str];

    /// Reject layer geometries the variant cannot wrap.
    fn check_shape(_prefix: &str, _shape: &LayerShape) -> Result<()> {
        Ok(())
    }

    /// Expected tensor shapes, aligned with `FIELDS`.
    fn shapes(shape: &LayerShape, rank: usize) -> Vec<Vec<usize>>;

    /// Fresh factors for `layer`.
    fn initialize<R: Rng + ?Sized>(layer: &Layer, shape: &LayerShape, rank: usize, rng: &mut R) -> Result<Self>;

    fn tensors(&self) -> Vec<&Tensor>;

    fn tensors_mut(&mut self) -> Vec<&mut Tensor>;

    /// Adapted output of the wrapped layer for input `x`.
    fn forward(&self, core: &AdapterCore, shape: &LayerShape, x: &Tensor) -> Result<Tensor>;
}

/// One adapter bound to a frozen layer.
#[derive(Debug, Clone)]
pub struct Adapter<F: AdapterFactors> {
    core: AdapterCore,
    factors: Option<F>,
}

impl<F: AdapterFactors> Adapter<F> {
    /// Create an uninitialized adapter.
    ///
    /// Layers of an unknown kind are accepted with a warning; such an adapter
    /// passes its input through the base layer untouched.
    pub fn new(prefix: impl Into<String>, layer: Arc<Layer>, rank: usize, alpha: f32) -> Result<Self> {
        let core = AdapterCore::new(prefix.into(), layer, rank, alpha)?;
        match core.layer.shape() {
            Some(shape) => F::check_shape(&core.prefix, &shape)?,
            None => warn!(
                prefix = %core.prefix,
                layer_type = core.layer.type_name(),
                "layer kind has no adapter form; forward will pass through"
            ),
        }
        Ok(Self { core, factors: None })
    }

    pub fn core(&self) -> &AdapterCore {
        &self.core
    }

    pub fn variant(&self) -> AdapterVariant {
        F::VARIANT
    }

    pub fn is_initialized(&self) -> bool {
        self.factors.is_some()
    }

    /// Factors, or [`Error::NotInitialized`].
    pub fn factors(&self) -> Result<&F> {
        self.factors.as_ref().ok_or_else(|| self.not_initialized())
    }

    fn not_initialized(&self) -> Error {
        Error::NotInitialized { prefix: self.core.prefix.clone() }
    }

    fn supported_shape(&self) -> Result<LayerShape> {
        self.core.layer.shape().ok_or_else(|| Error::UnsupportedLayer {
            name: self.core.prefix.clone(),
            reason: format!("{} has no adapter form", self.core.layer.type_name()),
        })
    }

    /// Reseed the dropout stream.
    pub fn set_seed(&mut self, seed: u64) {
        self.core.rng = RefCell::new(StdRng::seed_from_u64(seed));
    }

    /// Randomly initialize the factors; a no-op once initialized.
    pub fn initialize<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        if self.factors.is_some() {
            debug!(prefix = %self.core.prefix, "already initialized");
            return Ok(());
        }
        let shape = self.supported_shape()?;
        let factors = F::initialize(&self.core.layer, &shape, self.core.rank, rng)?;
        self.factors = Some(self.placed(factors)?);
        Ok(())
    }

    /// Move every factor to the adapter's device/dtype and gradient flag.
    fn placed(&self, mut factors: F) -> Result<F> {
        for t in factors.tensors_mut() {
            *t = t.to(self.core.device, self.core.dtype)?.with_requires_grad(self.core.requires_grad);
        }
        Ok(factors)
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let Some(shape) = self.core.layer.shape() else {
            warn!(prefix = %self.core.prefix, "unsupported layer kind, passing input through");
            return self.core.layer.forward(x);
        };
        self.factors()?.forward(&self.core, &shape, x)
    }

    /// Serialized factors plus the `alpha` buffer, keyed `<extra_prefix><prefix><field>`.
    pub fn state_dict(&self, extra_prefix: &str) -> Result<StateDict> {
        let factors = self.factors()?;
        let full = format!("{extra_prefix}{}", self.core.prefix);
        let mut dict: StateDict = F::FIELDS
            .iter()
            .zip(factors.tensors())
            .map(|(field, t)| (format!("{full}{field}"), t.clone()))
            .collect();
        dict.insert(format!("{full}{}", keys::ALPHA), Tensor::scalar(self.core.alpha));
        Ok(dict)
    }

    /// Load the entries of `dict` under this adapter's prefix and hand back the rest.
    ///
    /// Fields under the prefix that this variant does not own are returned
    /// with the prefix restored.
    pub fn load_state_dict(&mut self, dict: StateDict) -> Result<StateDict> {
        let (own, mut rest) = partition_prefixed(dict, &self.core.prefix);
        let unused = self.load_owned(own)?;
        rest.extend(with_prefix(unused, &self.core.prefix));
        Ok(rest)
    }

    /// Load prefix-stripped entries; returns the fields this variant does not own.
    ///
    /// All shapes are checked before anything is written, so a failed load
    /// leaves the adapter as it was. An empty input never initializes.
    pub fn load_owned(&mut self, mut own: StateDict) -> Result<StateDict> {
        if own.is_empty() {
            return Ok(own);
        }
        let shape = self.supported_shape()?;

        let alpha = match own.remove(keys::ALPHA) {
            Some(t) => Some(t.scalar_value().ok_or_else(|| Error::ShapeMismatch {
                key: format!("{}{}", self.core.prefix, keys::ALPHA),
                expected: vec![],
                actual: t.shape().to_vec(),
            })?),
            None => None,
        };

        let incoming: Vec<Option<Tensor>> = F::FIELDS.iter().map(|f| own.remove(*f)).collect();
        for ((field, expected), t) in F::FIELDS.iter().zip(F::shapes(&shape, self.core.rank)).zip(&incoming) {
            if let Some(t) = t {
                if t.shape() != expected.as_slice() {
                    return Err(Error::ShapeMismatch {
                        key: format!("{}{field}", self.core.prefix),
                        expected,
                        actual: t.shape().to_vec(),
                    });
                }
            }
        }

        let loaded = incoming.iter().filter(|t| t.is_some()).count();
        if loaded > 0 {
            let mut factors = match &self.factors {
                Some(f) => f.clone(),
                None => F::initialize(
                    &self.core.layer,
                    &shape,
                    self.core.rank,
                    &mut *self.core.rng.borrow_mut(),
                )?,
            };
            for (slot, t) in factors.tensors_mut().into_iter().zip(incoming) {
                if let Some(t) = t {
                    *slot = t;
                }
            }
            self.factors = Some(self.placed(factors)?);
        }
        if let Some(alpha) = alpha {
            self.core.alpha = alpha;
        }

        debug!(prefix = %self.core.prefix, loaded, unused = own.len(), "loaded adapter state");
        Ok(own)
    }

    /// Route the layer's calls through this adapter. Idempotent.
    pub fn hook_to_module(&mut self) {
        if !self.core.hooked {
            self.core.hooked = true;
            debug!(prefix = %self.core.prefix, "hooked");
        }
    }

    /// Route the layer's calls back to the base layer. Idempotent.
    pub fn remove_hook_from_module(&mut self) {
        if self.core.hooked {
            self.core.hooked = false;
            debug!(prefix = %self.core.prefix, "unhooked");
        }
    }

    pub fn train(&mut self) {
        self.core.training = true;
    }

    pub fn eval(&mut self) {
        self.core.training = false;
    }

    pub fn set_dropout(&mut self, p: f32) -> Result<()> {
        check_dropout(p)?;
        self.core.dropout = p;
        Ok(())
    }

    pub fn requires_grad(&mut self, requires_grad: bool) {
        self.core.requires_grad = requires_grad;
        if let Some(factors) = &mut self.factors {
            for t in factors.tensors_mut() {
                t.set_requires_grad(requires_grad);
            }
        }
    }

    /// Move to `device`/`dtype`; on failure nothing changes.
    pub fn to(&mut self, device: Device, dtype: DType) -> Result<()> {
        if let Some(factors) = &self.factors {
            let mut moved = factors.clone();
            for t in moved.tensors_mut() {
                *t = t.to(device, dtype)?;
            }
            self.factors = Some(moved);
        }
        self.core.device = device;
        self.core.dtype = dtype;
        Ok(())
    }

    pub fn parameters(&self) -> Result<Vec<&Tensor>> {
        Ok(self.factors()?.tensors())
    }

    /// Trainable tensors keyed by their full checkpoint name.
    pub fn named_parameters(&self) -> Result<Vec<(String, &Tensor)>> {
        let prefix = &self.core.prefix;
        Ok(F::FIELDS
            .iter()
            .zip(self.factors()?.tensors())
            .map(|(field, t)| (format!("{prefix}{field}"), t))
            .collect())
    }

    pub fn named_parameters_mut(&mut self) -> Result<Vec<(String, &mut Tensor)>> {
        let prefix = self.core.prefix.clone();
        let factors = self.factors.as_mut().ok_or_else(|| Error::NotInitialized { prefix: prefix.clone() })?;
        Ok(F::FIELDS
            .iter()
            .zip(factors.tensors_mut())
            .map(|(field, t)| (format!("{prefix}{field}"), t))
            .collect())
    }
}

impl<F: AdapterFactors> Forward for Adapter<F> {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Adapter::forward(self, x)
    }
}

/// Kaiming-uniform with `a = sqrt(5)`: `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
pub(crate) fn kaiming_uniform<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Result<Tensor> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    Ok(Tensor::from_fn(shape, || dist.sample(rng)))
}

pub(crate) fn normal<R: Rng + ?Sized>(shape: &[usize], std: f32, rng: &mut R) -> Result<Tensor> {
    let dist = Normal::new(0.0, std).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    Ok(Tensor::from_fn(shape, || dist.sample(rng)))
}

/// `base + scale * delta`
pub(crate) fn add_scaled(mut base: Tensor, delta: &Tensor, scale: f32) -> Result<Tensor> {
    if base.shape() != delta.shape() {
        return Err(Error::ShapeMismatch {
            key: "adapter output".to_string(),
            expected: base.shape().to_vec(),
            actual: delta.shape().to_vec(),
        });
    }
    base.data_mut().scaled_add(scale, delta.data());
    Ok(base)
}

/// Shape of the per-output-channel vector broadcast against a layer weight.
pub(crate) fn channel_shape(shape: &LayerShape) -> Vec<usize> {
    match shape {
        LayerShape::Dense { out_features, .. } => vec![*out_features, 1],
        LayerShape::GridConv { out_channels, .. } => vec![*out_channels, 1, 1, 1],
    }
}
