//! Wrapping a frozen base model with adapters
//!
//! [`AdapterWrapper`] walks the model once, decides which layers get an
//! adapter and with which rank/alpha, and then owns every adapter, including
//! [`DummyAdapterModule`] placeholders for checkpoint entries that have no
//! live layer.
//!
//! Hooks are composition rather than patching: [`AdapterWrapper::layer`]
//! hands out the adapter for a hooked layer and the plain base layer
//! otherwise, and [`AdapterWrapper::forward`] is the call-site entry point.

mod report;


pub use report::{BuildReport, LoadReport, TransferReport};

use super::adapter::{AdapterModule, AdapterVariant, DummyAdapterModule};
use super::config::{check_dropout, PeftConfig};
use super::glob::{any_match, compile_all, GlobPattern};
use super::keys;
use super::presets::PresetTable;
use super::rules::RuleSet;
use super::state_dict::{partition_prefixed, StateDict};
use crate::error::{Error, Result};
use crate::nn::{BaseModel, Forward, Layer};
use crate::tensor::{DType, Device};
use crate::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A live adapter or a checkpoint-only placeholder.
#[derive(Debug, Clone)]
pub enum AdapterEntry {
    Real(AdapterModule),
    Dummy(DummyAdapterModule),
}

impl AdapterEntry {
    pub fn prefix(&self) -> &str {
        match self {
            Self::Real(a) => a.prefix(),
            Self::Dummy(d) => d.prefix(),
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self, Self::Dummy(_))
    }

    pub fn as_real(&self) -> Option<&AdapterModule> {
        match self {
            Self::Real(a) => Some(a),
            Self::Dummy(_) => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        match self {
            Self::Real(a) => a.is_initialized(),
            Self::Dummy(d) => d.is_initialized(),
        }
    }
}

/// All adapters of one base model.
#[derive(Debug, Clone)]
pub struct AdapterWrapper {
    prefix: String,
    variant: AdapterVariant,
    config: PeftConfig,
    rules: RuleSet,
    filters: Vec<GlobPattern>,
    layers: BTreeMap<String, Arc<Layer>>,
    modules: BTreeMap<String, AdapterEntry>,
    report: BuildReport,
}

impl AdapterWrapper {
    /// Build uninitialized adapters for every eligible layer of `model`.
    ///
    /// Configuration mistakes fail the whole call. A layer whose adapter
    /// cannot be constructed is logged, recorded in [`BuildReport::failures`]
    /// and left out.
    pub fn new(
        model: &dyn BaseModel,
        prefix: impl Into<String>,
        config: &PeftConfig,
        presets: &PresetTable,
    ) -> Result<Self> {
        let prefix = prefix.into();
        config.validate()?;
        let variant = AdapterVariant::select(config.peft_type, config.use_dora)?;

        let preset = presets.resolve(config.layer_preset.as_deref())?;
        let rules = RuleSet::merged(&config.module_overrides, &preset.overrides)?;
        let mut filter_patterns = preset.filters;
        for pattern in &config.layer_filter {
            if !filter_patterns.contains(pattern) {
                filter_patterns.push(pattern.clone());
            }
        }
        let filters = compile_all(&filter_patterns)?;

        let mut report = BuildReport::default();
        let mut layers = BTreeMap::new();
        let mut modules = BTreeMap::new();
        let mut prefixes = BTreeSet::new();

        for (name, layer) in model.named_layers() {
            report.candidates += 1;
            layers.insert(name.clone(), layer.clone());

            if layer.kind().is_none() {
                debug!(layer = %name, layer_type = layer.type_name(), "skipping unsupported layer kind");
                report.unsupported.push(name);
                continue;
            }
            if !any_match(&filters, &name) {
                report.filtered_out.push(name);
                continue;
            }
            report.admitted.push(name.clone());

            let (rank, alpha) = rules.resolve(&name, config.rank, config.alpha);
            let adapter_prefix = keys::adapter_prefix(&prefix, &name);
            if !prefixes.insert(adapter_prefix.clone()) {
                warn!(layer = %name, prefix = %adapter_prefix, "adapter prefix already taken, skipping layer");
                report.failures.push((name, format!("duplicate adapter prefix '{adapter_prefix}'")));
                continue;
            }

            let built = AdapterModule::new(variant, adapter_prefix, layer, rank, alpha)
                .and_then(|mut a| a.set_dropout(config.dropout).map(|()| a));
            match built {
                Ok(adapter) => {
                    debug!(layer = %name, rank, alpha, %variant, "created adapter");
                    report.constructed.push(name.clone());
                    modules.insert(name, AdapterEntry::Real(adapter));
                }
                Err(e) => {
                    warn!(layer = %name, error = %e, "failed to create adapter");
                    prefixes.remove(&keys::adapter_prefix(&prefix, &name));
                    report.failures.push((name, e.to_string()));
                }
            }
        }

        info!(
            prefix = %prefix,
            %variant,
            expected = report.expected(),
            constructed = report.constructed.len(),
            failed = report.failures.len(),
            "wrapped base model"
        );

        Ok(Self { prefix, variant, config: config.clone(), rules, filters, layers, modules, report })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn variant(&self) -> AdapterVariant {
        self.variant
    }

    pub fn config(&self) -> &PeftConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Combined name filter; empty admits every layer.
    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(GlobPattern::as_str)
    }

    pub fn build_report(&self) -> &BuildReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AdapterEntry> {
        self.modules.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AdapterEntry> {
        self.modules.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Live adapters by layer name.
    pub fn adapters(&self) -> impl Iterator<Item = (&str, &AdapterModule)> {
        self.modules.iter().filter_map(|(n, e)| match e {
            AdapterEntry::Real(a) => Some((n.as_str(), a)),
            AdapterEntry::Dummy(_) => None,
        })
    }

    fn adapters_mut(&mut self) -> impl Iterator<Item = (&str, &mut AdapterModule)> {
        self.modules.iter_mut().filter_map(|(n, e)| match e {
            AdapterEntry::Real(a) => Some((n.as_str(), a)),
            AdapterEntry::Dummy(_) => None,
        })
    }

    pub fn dummies(&self) -> impl Iterator<Item = (&str, &DummyAdapterModule)> {
        self.modules.iter().filter_map(|(n, e)| match e {
            AdapterEntry::Dummy(d) => Some((n.as_str(), d)),
            AdapterEntry::Real(_) => None,
        })
    }

    /// Randomly initialize every live adapter that has no weights yet.
    ///
    /// Adapters whose weights cannot be placed on their device are skipped
    /// and logged; returns how many were initialized.
    pub fn initialize_weights(&mut self, seed: Option<u64>) -> Result<usize> {
        let seed = seed.or(self.config.seed).unwrap_or(0);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut initialized = 0;
        for (name, adapter) in self.adapters_mut() {
            if adapter.is_initialized() {
                continue;
            }
            adapter.set_seed(rng.random());
            match adapter.initialize(&mut rng) {
                Ok(()) => initialized += 1,
                Err(e) if e.is_recoverable() => warn!(adapter = name, error = %e, "skipping initialization"),
                Err(e) => return Err(e),
            }
        }
        debug!(initialized, seed, "initialized adapter weights");
        Ok(initialized)
    }

    /// Reconcile a checkpoint with the live adapters.
    ///
    /// Live adapters (and placeholders from earlier loads) take their keys
    /// first. Every remaining key under the wrapper prefix is then grouped by
    /// adapter prefix; each unseen prefix becomes a [`DummyAdapterModule`].
    /// Nothing here fails the whole load: rejected and unrecognized keys are
    /// logged and listed in the report.
    pub fn load_state_dict(&mut self, dict: StateDict) -> LoadReport {
        let mut report = LoadReport::default();
        let mut remaining = dict;

        for (name, entry) in self.modules.iter_mut() {
            let (own, rest) = partition_prefixed(remaining, entry.prefix());
            remaining = rest;
            if own.is_empty() {
                continue;
            }
            match entry {
                AdapterEntry::Real(adapter) => match adapter.load_owned(own) {
                    Ok(unused) => {
                        report.loaded.push(name.clone());
                        for key in unused.into_keys() {
                            let reason = format!("not a {} field", adapter.variant());
                            warn!(key = %format!("{}{key}", adapter.prefix()), %reason, "discarding checkpoint key");
                            report.discarded.push((format!("{}{key}", adapter.prefix()), reason));
                        }
                    }
                    Err(e) => {
                        warn!(adapter = %name, error = %e, "failed to load adapter state");
                        report.failed.push((name.clone(), e.to_string()));
                    }
                },
                AdapterEntry::Dummy(dummy) => {
                    dummy.load_owned(own);
                    report.loaded.push(name.clone());
                }
            }
        }

        let scope = if self.prefix.is_empty() { String::new() } else { format!("{}_", self.prefix) };
        let (mut remaining, outside): (StateDict, StateDict) =
            remaining.into_iter().partition(|(k, _)| k.starts_with(&scope));
        for key in outside.into_keys() {
            debug!(%key, "ignoring key outside wrapper prefix");
            report.outside_prefix.push(key);
        }

        let mut handled: BTreeSet<String> = self.modules.values().map(|e| e.prefix().to_string()).collect();
        while let Some(key) = remaining.keys().next().cloned() {
            let before = remaining.len();
            match keys::split_key(&key) {
                None => {
                    remaining.remove(&key);
                    warn!(%key, "discarding checkpoint key with unknown field");
                    report.discarded.push((key, "unrecognized field".to_string()));
                }
                Some((adapter_prefix, _)) => {
                    let adapter_prefix = adapter_prefix.to_string();
                    let (own, rest) = partition_prefixed(remaining, &adapter_prefix);
                    remaining = rest;
                    if handled.contains(&adapter_prefix) {
                        for field in own.into_keys() {
                            report.discarded.push((format!("{adapter_prefix}{field}"), "adapter already loaded".to_string()));
                        }
                        continue;
                    }
                    let name = keys::relative_name(&self.prefix, &adapter_prefix).to_string();
                    if self.modules.contains_key(&name) {
                        warn!(adapter = %name, prefix = %adapter_prefix, "placeholder name already taken, discarding keys");
                        let reason = format!("placeholder name '{name}' already taken");
                        for field in own.into_keys() {
                            report.discarded.push((format!("{adapter_prefix}{field}"), reason.clone()));
                        }
                        handled.insert(adapter_prefix);
                        continue;
                    }
                    let mut dummy = DummyAdapterModule::new(adapter_prefix.clone());
                    dummy.load_owned(own);
                    debug!(adapter = %name, keys = dummy.len(), "created placeholder adapter");
                    handled.insert(adapter_prefix);
                    report.dummies_created.push(name.clone());
                    self.modules.insert(name, AdapterEntry::Dummy(dummy));
                }
            }
            debug_assert!(remaining.len() < before);
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            dummies = report.dummies_created.len(),
            discarded = report.discarded.len(),
            "loaded adapter checkpoint"
        );
        report
    }

    /// Every initialized adapter's tensors plus every placeholder's.
    pub fn state_dict(&self) -> StateDict {
        let mut dict = StateDict::new();
        for (name, entry) in &self.modules {
            match entry {
                AdapterEntry::Real(adapter) => match adapter.state_dict("") {
                    Ok(part) => dict.extend(part),
                    Err(e) => debug!(adapter = %name, error = %e, "leaving adapter out of state dict"),
                },
                AdapterEntry::Dummy(dummy) => dict.extend(dummy.state_dict("")),
            }
        }
        dict
    }

    /// Drop every placeholder; returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.modules.len();
        self.modules.retain(|_, e| !e.is_dummy());
        let pruned = before - self.modules.len();
        if pruned > 0 {
            info!(pruned, "pruned placeholder adapters");
        }
        pruned
    }

    /// Trainable tensors of initialized live adapters.
    pub fn parameters(&self) -> Vec<&Tensor> {
        self.adapters()
            .filter(|(_, a)| a.is_initialized())
            .flat_map(|(_, a)| a.parameters().unwrap_or_default())
            .collect()
    }

    /// Trainable tensors keyed by their full checkpoint name.
    pub fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.adapters()
            .filter(|(_, a)| a.is_initialized())
            .flat_map(|(_, a)| a.named_parameters().unwrap_or_default())
            .collect()
    }

    pub fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        self.adapters_mut()
            .filter(|(_, a)| a.is_initialized())
            .flat_map(|(_, a)| a.named_parameters_mut().unwrap_or_default())
            .collect()
    }

    pub fn requires_grad(&mut self, requires_grad: bool) {
        for (_, adapter) in self.adapters_mut() {
            adapter.requires_grad(requires_grad);
        }
    }

    /// Move every adapter, placeholders included.
    ///
    /// An adapter that does not fit is left where it was; the rest still move.
    pub fn to(&mut self, device: Device, dtype: DType) -> TransferReport {
        let mut report = TransferReport { expected: self.modules.len(), ..Default::default() };
        for (name, entry) in self.modules.iter_mut() {
            let moved = match entry {
                AdapterEntry::Real(a) => a.to(device, dtype),
                AdapterEntry::Dummy(d) => d.to(device, dtype),
            };
            match moved {
                Ok(()) => report.moved += 1,
                Err(e) => {
                    warn!(adapter = %name, %device, error = %e, "failed to move adapter");
                    report.failures.push((name.clone(), e.to_string()));
                }
            }
        }
        if !report.is_complete() {
            warn!(expected = report.expected, moved = report.moved, %device, "partial device transfer");
        }
        report
    }

    pub fn hook_to_module(&mut self) {
        for (_, adapter) in self.adapters_mut() {
            adapter.hook_to_module();
        }
    }

    pub fn remove_hook_from_module(&mut self) {
        for (_, adapter) in self.adapters_mut() {
            adapter.remove_hook_from_module();
        }
    }

    /// Set dropout on every live adapter; rejects `p` outside `[0, 1]`.
    pub fn set_dropout(&mut self, p: f32) -> Result<()> {
        check_dropout(p)?;
        for (_, adapter) in self.adapters_mut() {
            adapter.set_dropout(p)?;
        }
        self.config.dropout = p;
        Ok(())
    }

    /// Training mode for hooked adapters.
    pub fn train(&mut self) {
        for (_, adapter) in self.adapters_mut().filter(|(_, a)| a.is_hooked()) {
            adapter.train();
        }
    }

    /// Evaluation mode for hooked adapters.
    pub fn eval(&mut self) {
        for (_, adapter) in self.adapters_mut().filter(|(_, a)| a.is_hooked()) {
            adapter.eval();
        }
    }

    /// What a call site should run for the base layer `name`.
    pub fn layer(&self, name: &str) -> Result<&dyn Forward> {
        if let Some(AdapterEntry::Real(adapter)) = self.modules.get(name) {
            if adapter.is_hooked() {
                return Ok(adapter);
            }
        }
        self.layers
            .get(name)
            .map(|l| &**l as &dyn Forward)
            .ok_or_else(|| Error::InvalidArgument(format!("base model has no layer '{name}'")))
    }

    pub fn forward(&self, name: &str, x: &Tensor) -> Result<Tensor> {
        self.layer(name)?.forward(x)
    }
}
