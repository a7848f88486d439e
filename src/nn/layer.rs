//! Frozen layers of the base model and their introspected shapes

use super::{Conv2d, Conv2dParams, Forward, Linear};
use crate::error::Result;
use crate::Tensor;
use serde::{Deserialize, Serialize};

/// The two layer kinds the adapter system knows how to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Dense,
    GridConv,
}

/// Shape parameters read off a frozen layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerShape {
    Dense {
        in_features: usize,
        out_features: usize,
    },
    GridConv {
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        params: Conv2dParams,
    },
}

impl LayerShape {
    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Dense { .. } => LayerKind::Dense,
            Self::GridConv { .. } => LayerKind::GridConv,
        }
    }

    pub fn out_features(&self) -> usize {
        match self {
            Self::Dense { out_features, .. } => *out_features,
            Self::GridConv { out_channels, .. } => *out_channels,
        }
    }

    pub fn in_features(&self) -> usize {
        match self {
            Self::Dense { in_features, .. } => *in_features,
            Self::GridConv { in_channels, .. } => *in_channels,
        }
    }

    /// Receptive field size per output (in * kh * kw for convolutions).
    pub fn fan_in(&self) -> usize {
        match self {
            Self::Dense { in_features, .. } => *in_features,
            Self::GridConv { in_channels, kernel_size, .. } => {
                in_channels * kernel_size.0 * kernel_size.1
            }
        }
    }
}

/// One candidate layer found while walking the base model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub kind: LayerKind,
    pub shape: LayerShape,
}

impl LayerSpec {
    /// Introspect `layer`; `None` for kinds the adapter system does not wrap.
    pub fn of(name: &str, layer: &Layer) -> Option<Self> {
        layer.shape().map(|shape| Self { name: name.to_string(), kind: shape.kind(), shape })
    }
}

/// A frozen layer of the base model.
#[derive(Debug, Clone)]
pub enum Layer {
    Linear(Linear),
    Conv2d(Conv2d),
    /// Any other module (norms, activations, attention glue). Opaque: passes input through.
    Other { type_name: String },
}

impl Layer {
    pub fn other(type_name: impl Into<String>) -> Self {
        Self::Other { type_name: type_name.into() }
    }

    pub fn kind(&self) -> Option<LayerKind> {
        self.shape().map(|s| s.kind())
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Linear(_) => "Linear",
            Self::Conv2d(_) => "Conv2d",
            Self::Other { type_name } => type_name,
        }
    }

    pub fn shape(&self) -> Option<LayerShape> {
        match self {
            Self::Linear(l) => Some(LayerShape::Dense {
                in_features: l.in_features(),
                out_features: l.out_features(),
            }),
            Self::Conv2d(c) => Some(LayerShape::GridConv {
                in_channels: c.in_channels(),
                out_channels: c.out_channels(),
                kernel_size: c.kernel_size(),
                params: c.params(),
            }),
            Self::Other { .. } => None,
        }
    }

    pub fn weight(&self) -> Option<&Tensor> {
        match self {
            Self::Linear(l) => Some(l.weight()),
            Self::Conv2d(c) => Some(c.weight()),
            Self::Other { .. } => None,
        }
    }

    pub fn bias(&self) -> Option<&Tensor> {
        match self {
            Self::Linear(l) => l.bias(),
            Self::Conv2d(c) => c.bias(),
            Self::Other { .. } => None,
        }
    }
}

impl Forward for Layer {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Linear(l) => l.forward(x),
            Self::Conv2d(c) => c.forward(x),
            Self::Other { .. } => Ok(x.clone()),
        }
    }
}

impl From<Linear> for Layer {
    fn from(l: Linear) -> Self {
        Self::Linear(l)
    }
}

impl From<Conv2d> for Layer {
    fn from(c: Conv2d) -> Self {
        Self::Conv2d(c)
    }
}
