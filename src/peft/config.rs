//! Adapter configuration

use super::glob::compile_all;
use super::rules::{LayerOverride, OverrideMap, RuleSet};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Adapter family requested by the training configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeftType {
    #[default]
    Lora,
    Loha,
}

impl PeftType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lora => "LORA",
            Self::Loha => "LOHA",
        }
    }
}

impl fmt::Display for PeftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeftType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LORA" => Ok(Self::Lora),
            "LOHA" => Ok(Self::Loha),
            _ => Err(Error::UnsupportedPeftType(s.to_string())),
        }
    }
}

impl TryFrom<String> for PeftType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PeftType> for String {
    fn from(t: PeftType) -> Self {
        t.as_str().to_string()
    }
}

fn default_rank() -> usize {
    16
}

fn default_alpha() -> f32 {
    1.0
}

/// Hyperparameters for wrapping a base model with adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeftConfig {
    #[serde(default)]
    pub peft_type: PeftType,
    /// Weight-decomposed LoRA; only valid with `LORA`
    #[serde(default)]
    pub use_dora: bool,
    #[serde(default = "default_rank")]
    pub rank: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default)]
    pub dropout: f32,
    /// Name looked up in the preset table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_preset: Option<String>,
    /// Extra glob filters, unioned with the preset's
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layer_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "OverrideMap::is_empty")]
    pub module_overrides: OverrideMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for PeftConfig {
    fn default() -> Self {
        Self {
            peft_type: PeftType::Lora,
            use_dora: false,
            rank: default_rank(),
            alpha: default_alpha(),
            dropout: 0.0,
            layer_preset: None,
            layer_filter: Vec::new(),
            module_overrides: OverrideMap::new(),
            seed: None,
        }
    }
}

impl PeftConfig {
    pub fn new(rank: usize, alpha: f32) -> Self {
        Self { rank, alpha, ..Self::default() }
    }

    pub fn with_peft_type(mut self, peft_type: PeftType) -> Self {
        self.peft_type = peft_type;
        self
    }

    pub fn with_dora(mut self, use_dora: bool) -> Self {
        self.use_dora = use_dora;
        self
    }

    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_preset(mut self, preset: impl Into<String>) -> Self {
        self.layer_preset = Some(preset.into());
        self
    }

    pub fn with_filter<S: Into<String>>(mut self, filters: impl IntoIterator<Item = S>) -> Self {
        self.layer_filter = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_override(mut self, pattern: impl Into<String>, layer_override: LayerOverride) -> Self {
        self.module_overrides.insert(pattern.into(), layer_override);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Fail-fast checks on hyperparameters and patterns.
    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(Error::ConfigError("rank must be positive".to_string()));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(Error::ConfigError(format!("alpha must be positive, got {}", self.alpha)));
        }
        check_dropout(self.dropout)?;
        if self.use_dora && self.peft_type != PeftType::Lora {
            return Err(Error::ConfigError(format!("use_dora requires LORA, got {}", self.peft_type)));
        }
        for (pattern, o) in &self.module_overrides {
            if o.rank == Some(0) {
                return Err(Error::ConfigError(format!("override '{pattern}' sets rank 0")));
            }
            if o.alpha.is_some_and(|a| !(a.is_finite() && a > 0.0)) {
                return Err(Error::ConfigError(format!("override '{pattern}' has a non-positive alpha")));
            }
        }
        compile_all(&self.layer_filter)?;
        RuleSet::from_map(&self.module_overrides)?;
        Ok(())
    }
}

/// Dropout probabilities must lie in `[0, 1]`.
pub fn check_dropout(p: f32) -> Result<()> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!("dropout probability must be in [0, 1], got {p}")))
    }
}
