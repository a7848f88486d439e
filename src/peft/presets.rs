//! Named layer-selection presets
//!
//! A preset is either a legacy list of glob filters or a map from glob to
//! override. For the map form the filter is the map's key set. A `null`
//! entry selects every layer and overrides nothing.

use super::rules::OverrideMap;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One entry of a preset table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LayerPreset {
    Filters(Vec<String>),
    Overrides(OverrideMap),
}

/// Filter and overrides a preset contributes to wrapper construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPreset {
    pub filters: Vec<String>,
    pub overrides: OverrideMap,
}

impl From<&LayerPreset> for ResolvedPreset {
    fn from(preset: &LayerPreset) -> Self {
        match preset {
            LayerPreset::Filters(filters) => Self { filters: filters.clone(), overrides: OverrideMap::new() },
            LayerPreset::Overrides(map) => Self { filters: map.keys().cloned().collect(), overrides: map.clone() },
        }
    }
}

/// Preset name -> preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetTable {
    presets: BTreeMap<String, Option<LayerPreset>>,
}

impl PresetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presets for UNet-style diffusion backbones.
    pub fn builtin() -> Self {
        let filters = |pats: &[&str]| Some(LayerPreset::Filters(pats.iter().map(|p| (*p).to_string()).collect()));
        let mut presets = BTreeMap::new();
        presets.insert("full".to_string(), None);
        presets.insert("attn-only".to_string(), filters(&["*attn*"]));
        presets.insert(
            "attn-mlp".to_string(),
            Some(LayerPreset::Overrides(
                ["*attn*", "*ff.net*", "*proj_in", "*proj_out"]
                    .iter()
                    .map(|p| ((*p).to_string(), Default::default()))
                    .collect(),
            )),
        );
        presets.insert("conv-only".to_string(), filters(&["*conv*", "*resnets*", "*downsamplers*", "*upsamplers*"]));
        Self { presets }
    }

    pub fn insert(&mut self, name: impl Into<String>, preset: Option<LayerPreset>) {
        self.presets.insert(name.into(), preset);
    }

    /// Builder form of [`PresetTable::insert`].
    pub fn with_preset(mut self, name: impl Into<String>, preset: Option<LayerPreset>) -> Self {
        self.insert(name, preset);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Option<LayerPreset>> {
        self.presets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// Resolve an optional preset name; no name means no filter and no overrides.
    pub fn resolve(&self, name: Option<&str>) -> Result<ResolvedPreset> {
        let Some(name) = name else {
            return Ok(ResolvedPreset::default());
        };
        match self.presets.get(name) {
            Some(Some(preset)) => Ok(preset.into()),
            Some(None) => Ok(ResolvedPreset::default()),
            None => Err(Error::ConfigError(format!(
                "unknown layer preset '{name}' (available: {})",
                self.names().collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a user table, choosing the format from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml" | "yml") => Self::from_yaml(&content),
            other => Err(Error::ConfigError(format!(
                "unsupported preset table extension {other:?} for {}",
                path.display()
            ))),
        }
    }
}
