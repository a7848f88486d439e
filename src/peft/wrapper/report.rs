//! Counters returned by wrapper operations that tolerate per-item failures

use serde::Serialize;

/// Outcome of wrapping a base model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    /// Every named submodule seen
    pub candidates: usize,
    /// Submodules of a kind with no adapter form
    pub unsupported: Vec<String>,
    /// Supported layers rejected by the name filter
    pub filtered_out: Vec<String>,
    /// Layers that passed the filter
    pub admitted: Vec<String>,
    pub constructed: Vec<String>,
    /// `(layer, reason)` for admitted layers whose adapter could not be built
    pub failures: Vec<(String, String)>,
}

impl BuildReport {
    /// Adapters that should exist.
    pub fn expected(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of reconciling a checkpoint with the live adapters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Adapters that took at least one key
    pub loaded: Vec<String>,
    /// `(adapter, reason)` for adapters whose keys were rejected
    pub failed: Vec<(String, String)>,
    /// Placeholders registered for prefixes with no live layer
    pub dummies_created: Vec<String>,
    /// `(key, reason)` for keys dropped without being stored
    pub discarded: Vec<(String, String)>,
    /// Keys that do not belong to this wrapper at all
    pub outside_prefix: Vec<String>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.discarded.is_empty()
    }
}

/// Outcome of moving adapters to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferReport {
    pub expected: usize,
    pub moved: usize,
    /// `(adapter, reason)` for adapters left where they were
    pub failures: Vec<(String, String)>,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.moved == self.expected
    }
}
