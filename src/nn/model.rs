//! The frozen base model as seen by the adapter system

use super::{Layer, LayerSpec};
use std::sync::Arc;

/// A frozen network that can enumerate its named submodules.
///
/// Layers are shared through `Arc` so adapters can hold on to the layer they
/// wrap without owning the model.
pub trait BaseModel {
    /// Every named submodule, in traversal order.
    fn named_layers(&self) -> Vec<(String, Arc<Layer>)>;

    /// Shapes of the submodules the adapter system can wrap.
    fn layer_specs(&self) -> Vec<LayerSpec> {
        self.named_layers()
            .iter()
            .filter_map(|(name, layer)| LayerSpec::of(name, layer))
            .collect()
    }
}

/// Flat name -> layer container.
#[derive(Debug, Clone, Default)]
pub struct FrozenModel {
    layers: Vec<(String, Arc<Layer>)>,
}

impl FrozenModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FrozenModel::push`].
    pub fn with_layer(mut self, name: impl Into<String>, layer: impl Into<Layer>) -> Self {
        self.push(name, layer);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, layer: impl Into<Layer>) {
        self.layers.push((name.into(), Arc::new(layer.into())));
    }

    pub fn layer(&self, name: &str) -> Option<&Arc<Layer>> {
        self.layers.iter().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl BaseModel for FrozenModel {
    fn named_layers(&self) -> Vec<(String, Arc<Layer>)> {
        self.layers.clone()
    }
}
