//! Adapter checkpoints on disk (safetensors)
//!
//! The header carries `peft_type`, `rank`, `alpha` and `format` so other
//! tooling can tell what kind of adapter a file holds without parsing keys.

use super::config::PeftType;
use super::state_dict::StateDict;
use super::wrapper::{AdapterWrapper, LoadReport};
use crate::error::{Error, Result};
use crate::io::{archive, ArchiveMetadata};
use std::path::Path;
use tracing::info;

/// Summary written to the archive header.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterMetadata {
    pub peft_type: PeftType,
    pub rank: usize,
    pub alpha: f32,
    pub format: String,
}

impl AdapterMetadata {
    pub fn new(peft_type: PeftType, rank: usize, alpha: f32) -> Self {
        Self { peft_type, rank, alpha, format: "pt".to_string() }
    }

    fn to_header(&self) -> ArchiveMetadata {
        let mut header = ArchiveMetadata::new();
        header.insert("peft_type".to_string(), self.peft_type.to_string());
        header.insert("rank".to_string(), self.rank.to_string());
        header.insert("alpha".to_string(), self.alpha.to_string());
        header.insert("format".to_string(), self.format.clone());
        header
    }

    fn from_header(header: &ArchiveMetadata) -> Result<Option<Self>> {
        let Some(peft_type) = header.get("peft_type") else {
            return Ok(None);
        };
        let field = |name: &str| {
            header
                .get(name)
                .ok_or_else(|| Error::MissingData(format!("adapter header has no '{name}'")))
        };
        Ok(Some(Self {
            peft_type: peft_type.parse()?,
            rank: field("rank")?
                .parse()
                .map_err(|e| Error::Serialization(format!("bad rank in adapter header: {e}")))?,
            alpha: field("alpha")?
                .parse()
                .map_err(|e| Error::Serialization(format!("bad alpha in adapter header: {e}")))?,
            format: header.get("format").cloned().unwrap_or_else(|| "pt".to_string()),
        }))
    }
}

/// Write a state dict with adapter metadata.
pub fn save_state_dict(path: impl AsRef<Path>, dict: &StateDict, metadata: &AdapterMetadata) -> Result<()> {
    archive::write(path, dict, Some(metadata.to_header()))
}

/// Read a state dict and, when present, its adapter metadata.
pub fn load_state_dict_file(path: impl AsRef<Path>) -> Result<(StateDict, Option<AdapterMetadata>)> {
    let (dict, header) = archive::read(path)?;
    let metadata = match header {
        Some(h) => AdapterMetadata::from_header(&h)?,
        None => None,
    };
    Ok((dict, metadata))
}

impl AdapterWrapper {
    /// Save every adapter, placeholders included.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dict = self.state_dict();
        let config = self.config();
        let metadata = AdapterMetadata::new(self.variant().peft_type(), config.rank, config.alpha);
        save_state_dict(path, &dict, &metadata)?;
        info!(path = %path.display(), tensors = dict.len(), "saved adapters");
        Ok(())
    }

    /// Load a checkpoint file and reconcile it with the live adapters.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<LoadReport> {
        let (dict, _) = load_state_dict_file(path)?;
        Ok(self.load_state_dict(dict))
    }
}
