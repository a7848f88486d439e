//! Logical devices and storage dtypes

use serde::{Deserialize, Serialize};

/// Storage precision of a tensor.
///
/// Values are always held as `f32` on the host; converting to a narrower
/// dtype rounds every element through that format so the numerics match what
/// the accelerator would see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F32,
    F16,
    BF16,
}

impl DType {
    /// Bytes per element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    /// Round a value to the precision of this dtype.
    pub fn round(self, value: f32) -> f32 {
        match self {
            Self::F32 => value,
            Self::F16 => half::f16::from_f32(value).to_f32(),
            Self::BF16 => half::bf16::from_f32(value).to_f32(),
        }
    }
}

/// Where a tensor lives.
///
/// `Accelerator` carries an optional per-tensor memory limit in bytes; a
/// transfer that does not fit fails with [`crate::Error::ResourceExhausted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator {
        ordinal: usize,
        #[serde(default)]
        memory_limit: Option<usize>,
    },
}

impl Device {
    /// Accelerator without a memory limit.
    pub fn accelerator(ordinal: usize) -> Self {
        Self::Accelerator { ordinal, memory_limit: None }
    }

    /// Accelerator that rejects tensors larger than `bytes`.
    pub fn accelerator_with_limit(ordinal: usize, bytes: usize) -> Self {
        Self::Accelerator { ordinal, memory_limit: Some(bytes) }
    }

    pub fn is_cpu(&self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Whether a buffer of `bytes` can be placed on this device.
    pub fn can_hold(&self, bytes: usize) -> bool {
        match self {
            Self::Cpu => true,
            Self::Accelerator { memory_limit, .. } => memory_limit.is_none_or(|limit| bytes <= limit),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accelerator { ordinal, .. } => write!(f, "accelerator:{ordinal}"),
        }
    }
}
