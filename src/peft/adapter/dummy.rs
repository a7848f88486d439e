//! Placeholder for checkpoint entries that have no live layer
//!
//! A dummy keeps the tensors it was fed verbatim so that saving the wrapper
//! again reproduces the checkpoint it came from.

use crate::error::{Error, Result};
use crate::nn::Forward;
use crate::peft::state_dict::{partition_prefixed, StateDict};
use crate::tensor::{DType, Device};
use crate::Tensor;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct DummyAdapterModule {
    prefix: String,
    tensors: StateDict,
    initialized: bool,
}

impl DummyAdapterModule {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), tensors: StateDict::new(), initialized: false }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether at least one tensor has been captured.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Captured tensors, keyed by field.
    pub fn tensors(&self) -> &StateDict {
        &self.tensors
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Capture every entry under this prefix; the rest is handed back.
    pub fn load_state_dict(&mut self, dict: StateDict) -> StateDict {
        let (own, rest) = partition_prefixed(dict, &self.prefix);
        self.load_owned(own);
        rest
    }

    /// Capture prefix-stripped entries.
    pub fn load_owned(&mut self, own: StateDict) {
        if own.is_empty() {
            return;
        }
        debug!(prefix = %self.prefix, keys = own.len(), "captured checkpoint entries without a live layer");
        self.tensors.extend(own);
        self.initialized = true;
    }

    pub fn state_dict(&self, extra_prefix: &str) -> StateDict {
        self.tensors
            .iter()
            .map(|(k, v)| (format!("{extra_prefix}{}{k}", self.prefix), v.clone()))
            .collect()
    }

    /// Move every captured tensor; on failure nothing changes.
    pub fn to(&mut self, device: Device, dtype: DType) -> Result<()> {
        let moved = self
            .tensors
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.to(device, dtype)?)))
            .collect::<Result<StateDict>>()?;
        self.tensors = moved;
        Ok(())
    }
}

impl Forward for DummyAdapterModule {
    fn forward(&self, _x: &Tensor) -> Result<Tensor> {
        Err(Error::Unsupported(format!("dummy adapter '{}' has no layer to run", self.prefix)))
    }
}
