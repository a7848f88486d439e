//! Saved weight-delta patterns
//!
//! A pattern maps parameter keys to deltas, either once for the whole run
//! (flat) or per epoch under `epoch_<N>/<key>`. On disk it is a safetensors
//! archive, or JSON of the form `{"<key>": {"shape": [..], "data": [..]}}`.

use crate::error::{Error, Result};
use crate::io::{archive, ArchiveMetadata};
use crate::tensor::{DType, Device};
use crate::Tensor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Parameter key -> tensor.
pub type DeltaMap = BTreeMap<String, Tensor>;

const EPOCH_PREFIX: &str = "epoch_";

/// Split `epoch_<N>/<key>` into `(N, key)`.
pub fn split_epoch_key(name: &str) -> Option<(usize, &str)> {
    let rest = name.strip_prefix(EPOCH_PREFIX)?;
    let (epoch, key) = rest.split_once('/')?;
    if key.is_empty() {
        return None;
    }
    epoch.parse().ok().map(|e| (e, key))
}

pub fn epoch_key(epoch: usize, key: &str) -> String {
    format!("{EPOCH_PREFIX}{epoch}/{key}")
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Reference trajectory of adapter weight deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ReferencePattern {
    #[default]
    Empty,
    Flat(DeltaMap),
    PerEpoch(BTreeMap<usize, DeltaMap>),
}

impl ReferencePattern {
    /// Classify archive entries: all `epoch_<N>/` keys, or none of them.
    pub fn from_entries(entries: DeltaMap) -> Result<Self> {
        if entries.is_empty() {
            return Ok(Self::Empty);
        }
        let nested = entries.keys().filter(|k| split_epoch_key(k).is_some()).count();
        if nested == 0 {
            return Ok(Self::Flat(entries));
        }
        if nested != entries.len() {
            return Err(Error::Serialization(
                "delta pattern mixes per-epoch and flat keys".to_string(),
            ));
        }
        let mut epochs: BTreeMap<usize, DeltaMap> = BTreeMap::new();
        for (name, tensor) in entries {
            if let Some((epoch, key)) = split_epoch_key(&name) {
                epochs.entry(epoch).or_default().insert(key.to_string(), tensor);
            }
        }
        Ok(Self::PerEpoch(epochs))
    }

    /// Flattened form, with `epoch_<N>/` keys for per-epoch patterns.
    pub fn to_entries(&self) -> DeltaMap {
        match self {
            Self::Empty => DeltaMap::new(),
            Self::Flat(map) => map.clone(),
            Self::PerEpoch(epochs) => epochs
                .iter()
                .flat_map(|(epoch, map)| map.iter().map(move |(k, t)| (epoch_key(*epoch, k), t.clone())))
                .collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: BTreeMap<String, JsonTensor> = serde_json::from_str(json)?;
        let entries = raw
            .into_iter()
            .map(|(k, t)| Ok((k, Tensor::from_vec(t.data, &t.shape)?)))
            .collect::<Result<DeltaMap>>()?;
        Self::from_entries(entries)
    }

    pub fn to_json(&self) -> Result<String> {
        let raw: BTreeMap<String, JsonTensor> = self
            .to_entries()
            .into_iter()
            .map(|(k, t)| (k, JsonTensor { shape: t.shape().to_vec(), data: t.to_vec() }))
            .collect();
        Ok(serde_json::to_string(&raw)?)
    }

    /// Read a pattern; `.json` files are JSON, anything else safetensors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if is_json(path) {
            return Self::from_json(&std::fs::read_to_string(path)?);
        }
        let (entries, _) = archive::read(path)?;
        let entries = entries
            .into_iter()
            .map(|(k, t)| Ok((k, t.to(Device::Cpu, DType::F32)?)))
            .collect::<Result<DeltaMap>>()?;
        Self::from_entries(entries)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if is_json(path) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, self.to_json()?)?;
            return Ok(());
        }
        let mut header = ArchiveMetadata::new();
        header.insert("format".to_string(), "delta_pattern".to_string());
        header.insert("epochs".to_string(), self.epochs().len().to_string());
        archive::write(path, &self.to_entries(), Some(header))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Flat(map) => map.is_empty(),
            Self::PerEpoch(epochs) => epochs.values().all(BTreeMap::is_empty),
        }
    }

    /// Recorded epochs; empty for flat patterns.
    pub fn epochs(&self) -> Vec<usize> {
        match self {
            Self::PerEpoch(epochs) => epochs.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn max_epoch(&self) -> Option<usize> {
        match self {
            Self::PerEpoch(epochs) => epochs.keys().next_back().copied(),
            _ => None,
        }
    }

    /// Deltas to compare against at `epoch`.
    ///
    /// Flat patterns apply to every epoch. Per-epoch patterns use the latest
    /// record at or before `epoch` (the earliest one before any record) and
    /// nothing past the last recorded epoch.
    pub fn for_epoch(&self, epoch: usize) -> Option<&DeltaMap> {
        self.select(epoch).map(|(_, map)| map)
    }

    /// Like [`Self::for_epoch`], also naming the recorded epoch that was picked.
    pub fn select(&self, epoch: usize) -> Option<(Option<usize>, &DeltaMap)> {
        match self {
            Self::Empty => None,
            Self::Flat(map) => Some((None, map)),
            Self::PerEpoch(epochs) => {
                if epoch > *epochs.keys().next_back()? {
                    return None;
                }
                epochs
                    .range(..=epoch)
                    .next_back()
                    .or_else(|| epochs.iter().next())
                    .map(|(e, map)| (Some(*e), map))
            }
        }
    }

    /// L2 norm over every stored delta.
    pub fn total_norm(&self) -> f64 {
        self.to_entries().values().map(squared_norm).sum::<f64>().sqrt()
    }
}

pub(crate) fn squared_norm(t: &Tensor) -> f64 {
    t.data().iter().map(|&v| f64::from(v) * f64::from(v)).sum()
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
