//! Adapter modules: one trainable adapter per wrapped layer
//!
//! [`AdapterModule`] is a closed set of variants sharing the lifecycle in
//! [`Adapter`]; each variant only supplies its factors, their
//! initialization and its forward rule.

mod core;
mod dora;
mod dummy;
mod loha;
mod lora;


pub use self::core::{Adapter, AdapterCore, AdapterFactors};
pub use dora::DoraFactors;
pub use dummy::DummyAdapterModule;
pub use loha::LohaFactors;
pub use lora::LoraFactors;

use super::config::PeftType;
use super::state_dict::StateDict;
use crate::error::{Error, Result};
use crate::nn::{Forward, Layer};
use crate::tensor::{DType, Device};
use crate::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type LoraAdapter = Adapter<LoraFactors>;
pub type DoraAdapter = Adapter<DoraFactors>;
pub type LohaAdapter = Adapter<LohaFactors>;

/// Adapter class chosen once per wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdapterVariant {
    Lora,
    Dora,
    Loha,
}

impl AdapterVariant {
    /// Variant for a PEFT type and decomposition flag.
    pub fn select(peft_type: PeftType, use_dora: bool) -> Result<Self> {
        match (peft_type, use_dora) {
            (PeftType::Lora, false) => Ok(Self::Lora),
            (PeftType::Lora, true) => Ok(Self::Dora),
            (PeftType::Loha, false) => Ok(Self::Loha),
            (PeftType::Loha, true) => Err(Error::ConfigError(
                "weight decomposition is only available for LORA".to_string(),
            )),
        }
    }

    /// PEFT type recorded in saved metadata.
    pub fn peft_type(&self) -> PeftType {
        match self {
            Self::Lora | Self::Dora => PeftType::Lora,
            Self::Loha => PeftType::Loha,
        }
    }
}

impl fmt::Display for AdapterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lora => "LORA",
            Self::Dora => "DORA",
            Self::Loha => "LOHA",
        })
    }
}

/// A live adapter of any variant.
#[derive(Debug, Clone)]
pub enum AdapterModule {
    Lora(LoraAdapter),
    Dora(DoraAdapter),
    Loha(LohaAdapter),
}

macro_rules! each_variant {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            AdapterModule::Lora($a) => $body,
            AdapterModule::Dora($a) => $body,
            AdapterModule::Loha($a) => $body,
        }
    };
}

impl AdapterModule {
    /// Uninitialized adapter of `variant` around `layer`.
    pub fn new(
        variant: AdapterVariant,
        prefix: impl Into<String>,
        layer: Arc<Layer>,
        rank: usize,
        alpha: f32,
    ) -> Result<Self> {
        Ok(match variant {
            AdapterVariant::Lora => Self::Lora(Adapter::new(prefix, layer, rank, alpha)?),
            AdapterVariant::Dora => Self::Dora(Adapter::new(prefix, layer, rank, alpha)?),
            AdapterVariant::Loha => Self::Loha(Adapter::new(prefix, layer, rank, alpha)?),
        })
    }

    pub fn variant(&self) -> AdapterVariant {
        each_variant!(self, a => a.variant())
    }

    pub fn core(&self) -> &AdapterCore {
        each_variant!(self, a => a.core())
    }

    pub fn prefix(&self) -> &str {
        self.core().prefix()
    }

    pub fn rank(&self) -> usize {
        self.core().rank()
    }

    pub fn alpha(&self) -> f32 {
        self.core().alpha()
    }

    pub fn is_initialized(&self) -> bool {
        each_variant!(self, a => a.is_initialized())
    }

    pub fn is_hooked(&self) -> bool {
        self.core().is_hooked()
    }

    pub fn set_seed(&mut self, seed: u64) {
        each_variant!(self, a => a.set_seed(seed))
    }

    pub fn initialize<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        each_variant!(self, a => a.initialize(rng))
    }

    pub fn state_dict(&self, extra_prefix: &str) -> Result<StateDict> {
        each_variant!(self, a => a.state_dict(extra_prefix))
    }

    pub fn load_state_dict(&mut self, dict: StateDict) -> Result<StateDict> {
        each_variant!(self, a => a.load_state_dict(dict))
    }

    pub fn load_owned(&mut self, own: StateDict) -> Result<StateDict> {
        each_variant!(self, a => a.load_owned(own))
    }

    pub fn hook_to_module(&mut self) {
        each_variant!(self, a => a.hook_to_module())
    }

    pub fn remove_hook_from_module(&mut self) {
        each_variant!(self, a => a.remove_hook_from_module())
    }

    pub fn train(&mut self) {
        each_variant!(self, a => a.train())
    }

    pub fn eval(&mut self) {
        each_variant!(self, a => a.eval())
    }

    pub fn set_dropout(&mut self, p: f32) -> Result<()> {
        each_variant!(self, a => a.set_dropout(p))
    }

    pub fn requires_grad(&mut self, requires_grad: bool) {
        each_variant!(self, a => a.requires_grad(requires_grad))
    }

    pub fn to(&mut self, device: Device, dtype: DType) -> Result<()> {
        each_variant!(self, a => a.to(device, dtype))
    }

    pub fn parameters(&self) -> Result<Vec<&Tensor>> {
        each_variant!(self, a => a.parameters())
    }

    pub fn named_parameters(&self) -> Result<Vec<(String, &Tensor)>> {
        each_variant!(self, a => a.named_parameters())
    }

    pub fn named_parameters_mut(&mut self) -> Result<Vec<(String, &mut Tensor)>> {
        each_variant!(self, a => a.named_parameters_mut())
    }

    /// Merging into the base weight is not available for any variant.
    pub fn apply_to_module(&mut self) -> Result<()> {
        Err(Error::Unsupported(format!("{} adapter cannot be merged into its layer", self.variant())))
    }

    /// Extracting factors from a weight difference is not available for any variant.
    pub fn extract_from_module(&mut self, _base: &Layer) -> Result<()> {
        Err(Error::Unsupported(format!("{} adapter cannot be extracted from a weight diff", self.variant())))
    }
}

impl Forward for AdapterModule {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        each_variant!(self, a => a.forward(x))
    }
}
