//! Penalizing deviation from a reference delta trajectory
//!
//! Run 1 snapshots its adapter weights at the start ([`capture_weights`])
//! and saves `final - initial` at the end ([`save_pattern`]). Run 2 loads
//! that pattern, snapshots its own start ([`capture_initial_weights_run2`])
//! and adds `lambda * distance(current - initial, reference)` to its loss.
//!
//! [`capture_weights`]: DeltaPatternRegularizer::capture_weights
//! [`save_pattern`]: DeltaPatternRegularizer::save_pattern
//! [`capture_initial_weights_run2`]: DeltaPatternRegularizer::capture_initial_weights_run2

use super::config::{DeltaMetric, DeltaPatternConfig};
use super::pattern::{epoch_key, DeltaMap, ReferencePattern};
use super::summary::DeltaSummary;
use crate::error::{Error, Result};
use crate::tensor::{DType, Device};
use crate::train::metrics::{report, MetricsSink};
use crate::train::progress::TrainProgress;
use crate::Tensor;
use serde::Serialize;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EPS: f64 = 1e-8;

/// L2 norms of the run-2 and reference deltas compared by the last penalty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeltaNorms {
    pub current: f64,
    pub reference: f64,
}

/// Expected vs cached tensors after filling the device cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub expected: usize,
    pub cached: usize,
}

impl CacheReport {
    pub fn is_complete(&self) -> bool {
        self.expected == self.cached
    }
}

/// Device-resident copies keyed like [`ReferencePattern::to_entries`] and the snapshot.
#[derive(Debug, Clone, Default)]
struct DeviceCache {
    reference: DeltaMap,
    initial: DeltaMap,
}

fn snapshot(params: &[(String, &Tensor)]) -> Result<DeltaMap> {
    params
        .iter()
        .map(|(k, t)| Ok((k.clone(), t.to(Device::Cpu, DType::F32)?.with_requires_grad(false))))
        .collect()
}

fn host_f64(t: &Tensor) -> impl Iterator<Item = f64> + '_ {
    t.data().iter().map(|&v| f64::from(v))
}

fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

#[derive(Debug, Clone, Default)]
pub struct DeltaPatternRegularizer {
    config: DeltaPatternConfig,
    initial_run1: DeltaMap,
    initial_run2: DeltaMap,
    reference: ReferencePattern,
    reference_norm: f64,
    epoch_deltas: BTreeMap<usize, DeltaMap>,
    cache: Option<DeviceCache>,
    last_norms: Cell<DeltaNorms>,
}

impl DeltaPatternRegularizer {
    /// Build a regularizer; loads `config.reference_path` when set.
    pub fn new(config: DeltaPatternConfig) -> Self {
        let mut reg = Self { config, ..Self::default() };
        if let Some(path) = reg.config.reference_path.clone() {
            reg.load_reference_pattern(path);
        }
        reg
    }

    pub fn config(&self) -> &DeltaPatternConfig {
        &self.config
    }

    pub fn reference(&self) -> &ReferencePattern {
        &self.reference
    }

    /// L2 norm of the loaded reference, 0 when none is loaded.
    pub fn reference_norm(&self) -> f64 {
        self.reference_norm
    }

    /// Norms from the last [`Self::compute_penalty`] that compared anything.
    pub fn last_norms(&self) -> DeltaNorms {
        self.last_norms.get()
    }

    pub fn has_reference(&self) -> bool {
        !self.reference.is_empty()
    }

    pub fn initial_run1(&self) -> &DeltaMap {
        &self.initial_run1
    }

    pub fn initial_run2(&self) -> &DeltaMap {
        &self.initial_run2
    }

    /// Snapshot run-1 starting weights to host memory; returns how many were taken.
    pub fn capture_weights(&mut self, params: &[(String, &Tensor)]) -> Result<usize> {
        self.initial_run1 = snapshot(params)?;
        self.epoch_deltas.clear();
        info!(tensors = self.initial_run1.len(), "captured run-1 initial weights");
        Ok(self.initial_run1.len())
    }

    /// Snapshot run-2 starting weights; drops any device cache.
    pub fn capture_initial_weights_run2(&mut self, params: &[(String, &Tensor)]) -> Result<usize> {
        self.initial_run2 = snapshot(params)?;
        self.cache = None;
        info!(tensors = self.initial_run2.len(), "captured run-2 initial weights");
        Ok(self.initial_run2.len())
    }

    /// Load a saved pattern; returns whether one is now loaded.
    ///
    /// A missing or malformed file is logged and leaves no reference.
    pub fn load_reference_pattern(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.cache = None;
        match ReferencePattern::load(path) {
            Ok(pattern) => {
                self.reference_norm = pattern.total_norm();
                info!(
                    path = %path.display(),
                    epochs = pattern.epochs().len(),
                    norm = self.reference_norm,
                    "loaded reference delta pattern"
                );
                self.reference = pattern;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not load reference delta pattern");
                self.reference = ReferencePattern::Empty;
                self.reference_norm = 0.0;
            }
        }
        self.has_reference()
    }

    /// Copy the reference and the run-2 snapshot to `config.cache_device`.
    ///
    /// Tensors that do not fit are skipped and keep being read from host.
    pub fn cache_on_device(&mut self) -> CacheReport {
        let device = self.config.cache_device;
        let mut report = CacheReport::default();
        let mut cache = DeviceCache::default();

        let reference = self.reference.to_entries();
        for (target, source) in [(&mut cache.reference, &reference), (&mut cache.initial, &self.initial_run2)] {
            for (key, tensor) in source {
                report.expected += 1;
                match tensor.to(device, DType::F32) {
                    Ok(t) => {
                        target.insert(key.clone(), t);
                        report.cached += 1;
                    }
                    Err(e) => warn!(%key, %device, error = %e, "skipping device cache entry"),
                }
            }
        }
        if !report.is_complete() {
            warn!(expected = report.expected, cached = report.cached, %device, "partial delta cache");
        }
        self.cache = Some(cache);
        report
    }

    fn cached_initial<'a>(&'a self, key: &str, host: &'a Tensor) -> &'a Tensor {
        self.cache.as_ref().and_then(|c| c.initial.get(key)).unwrap_or(host)
    }

    fn cached_reference<'a>(&'a self, name: &str, host: &'a Tensor) -> &'a Tensor {
        self.cache.as_ref().and_then(|c| c.reference.get(name)).unwrap_or(host)
    }

    /// `lambda * distance` between this run's deltas and the reference.
    ///
    /// Exactly 0 without a reference or a run-2 snapshot, past the last
    /// epoch of a per-epoch reference, or when no key can be compared.
    pub fn compute_penalty(
        &self,
        params: &[(String, &Tensor)],
        lambda_weight: f64,
        progress: &TrainProgress,
        mut sink: Option<&mut dyn MetricsSink>,
    ) -> f64 {
        if self.reference.is_empty() || self.initial_run2.is_empty() {
            debug!("no reference pattern or run-2 snapshot, delta penalty is 0");
            return 0.0;
        }
        let Some((recorded_epoch, reference)) = self.reference.select(progress.epoch) else {
            debug!(epoch = progress.epoch, max_epoch = ?self.reference.max_epoch(), "past reference horizon, delta penalty is 0");
            return 0.0;
        };

        let mut current: Vec<f64> = Vec::new();
        let mut target: Vec<f64> = Vec::new();
        let mut compared = 0usize;
        for (key, param) in params {
            let (Some(ref_host), Some(init_host)) = (reference.get(key), self.initial_run2.get(key)) else {
                continue;
            };
            let ref_name = recorded_epoch.map_or_else(|| key.clone(), |e| epoch_key(e, key));
            let ref_delta = self.cached_reference(&ref_name, ref_host);
            let init = self.cached_initial(key, init_host);
            if param.shape() != init.shape() || param.shape() != ref_delta.shape() {
                warn!(%key, "shape differs from reference, not compared");
                continue;
            }
            current.extend(host_f64(param).zip(host_f64(init)).map(|(p, i)| p - i));
            target.extend(host_f64(ref_delta));
            compared += 1;
        }
        if compared == 0 || current.is_empty() {
            debug!("no parameter matches the reference, delta penalty is 0");
            return 0.0;
        }

        let norms = DeltaNorms { current: l2_norm(&current), reference: l2_norm(&target) };
        self.last_norms.set(norms);
        let distance = match self.config.metric {
            DeltaMetric::Mse => {
                current.iter().zip(&target).map(|(c, t)| (c - t).powi(2)).sum::<f64>() / current.len() as f64
            }
            DeltaMetric::Cosine => {
                let dot: f64 = current.iter().zip(&target).map(|(c, t)| c * t).sum();
                1.0 - dot / (norms.current * norms.reference).max(EPS)
            }
        };
        let penalty = lambda_weight * distance;

        let step = progress.global_step;
        report(&mut sink, "delta/distance", distance, step);
        report(&mut sink, "delta/penalty", penalty, step);
        report(&mut sink, "delta/current_norm", norms.current, step);
        report(&mut sink, "delta/reference_norm", norms.reference, step);
        debug!(compared, distance, penalty, current_norm = norms.current, reference_norm = norms.reference, "delta penalty");
        penalty
    }

    /// [`Self::compute_penalty`] with the configured `lambda`.
    pub fn penalty(&self, params: &[(String, &Tensor)], progress: &TrainProgress, sink: Option<&mut dyn MetricsSink>) -> f64 {
        self.compute_penalty(params, self.config.lambda, progress, sink)
    }

    fn deltas_from_run1(&self, params: &[(String, &Tensor)]) -> Result<DeltaMap> {
        let mut deltas = DeltaMap::new();
        for (key, param) in params {
            let Some(initial) = self.initial_run1.get(key) else {
                debug!(%key, "no run-1 snapshot for parameter");
                continue;
            };
            let host = param.to(Device::Cpu, DType::F32)?;
            deltas.insert(key.clone(), host.sub(initial)?.with_requires_grad(false));
        }
        Ok(deltas)
    }

    /// Record `current - initial_run1` for `epoch`; returns how many deltas were stored.
    pub fn record_epoch_delta(&mut self, params: &[(String, &Tensor)], epoch: usize) -> Result<usize> {
        if self.initial_run1.is_empty() {
            warn!(epoch, "no run-1 snapshot, epoch delta not recorded");
            return Ok(0);
        }
        let deltas = self.deltas_from_run1(params)?;
        let n = deltas.len();
        self.epoch_deltas.insert(epoch, deltas);
        debug!(epoch, tensors = n, "recorded epoch delta");
        Ok(n)
    }

    pub fn recorded_epochs(&self) -> Vec<usize> {
        self.epoch_deltas.keys().copied().collect()
    }

    /// Persist `final - initial_run1` to `<dir>/<stem>.safetensors` plus a `<stem>.log` summary.
    ///
    /// Recorded epoch deltas are saved in the per-epoch format; when the final
    /// deltas differ from the last recorded epoch they close the pattern as
    /// one more epoch. Without recorded epochs the final deltas are saved
    /// flat. Returns the pattern path.
    pub fn save_pattern(&self, final_params: &[(String, &Tensor)], dir: impl AsRef<Path>, stem: &str) -> Result<PathBuf> {
        if self.initial_run1.is_empty() {
            return Err(Error::MissingData("no run-1 initial weights captured".to_string()));
        }
        let final_deltas = self.deltas_from_run1(final_params)?;
        if final_deltas.is_empty() {
            return Err(Error::MissingData("no parameter has a run-1 snapshot".to_string()));
        }

        let pattern = match self.epoch_deltas.last_key_value() {
            None => ReferencePattern::Flat(final_deltas.clone()),
            Some((&last, recorded)) => {
                let mut epochs = self.epoch_deltas.clone();
                if *recorded != final_deltas {
                    debug!(epoch = last + 1, "final deltas differ from last recorded epoch, appending");
                    epochs.insert(last + 1, final_deltas.clone());
                }
                ReferencePattern::PerEpoch(epochs)
            }
        };

        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{stem}.safetensors"));
        pattern.save(&path)?;

        let summary = DeltaSummary::of(&final_deltas);
        let mut log = format!("delta pattern: {}\nepochs saved: {}\n", path.display(), pattern.epochs().len());
        log.push_str(&summary.to_string());
        std::fs::write(dir.join(format!("{stem}.log")), log)?;

        info!(path = %path.display(), tensors = summary.tensors, norm = summary.total_norm, "saved delta pattern");
        Ok(path)
    }
}
