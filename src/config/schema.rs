//! Schema of a training spec file
//!
//! ```yaml
//! peft:
//!   peft_type: LORA
//!   rank: 16
//!   alpha: 8.0
//!   layer_preset: attn-mlp
//!   module_overrides:
//!     "*attn2*": { rank: 32 }
//! dynamic_loss:
//!   stats_mode: median_mad
//! delta_pattern:
//!   metric: cosine
//!   lambda: 0.05
//!   reference_path: runs/first/delta.safetensors
//! ```

use crate::peft::PeftConfig;
use crate::train::delta::DeltaPatternConfig;
use crate::train::loss::DynamicLossConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete fine-tuning setup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainSpec {
    /// Adapter configuration
    #[serde(default)]
    pub peft: PeftConfig,

    /// Extra presets (JSON or YAML) layered over the built-in table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_file: Option<PathBuf>,

    /// Optional dynamic loss weighting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_loss: Option<DynamicLossConfig>,

    /// Optional delta pattern regularization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_pattern: Option<DeltaPatternConfig>,
}
