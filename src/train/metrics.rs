//! Scalar metrics sinks
//!
//! Every component that reports metrics takes an `Option<&mut dyn MetricsSink>`;
//! passing `None` skips reporting entirely.

use std::collections::BTreeMap;

/// Receives `(name, value, step)` triples.
pub trait MetricsSink {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize);
}

/// Report to `sink` when there is one.
pub(crate) fn report(sink: &mut Option<&mut dyn MetricsSink>, name: &str, value: f64, step: usize) {
    if let Some(sink) = sink.as_deref_mut() {
        sink.log_scalar(name, value, step);
    }
}

/// In-memory sink keeping every logged value per name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySink {
    series: BTreeMap<String, Vec<(usize, f64)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(step, value)` pairs logged under `name`.
    pub fn series(&self, name: &str) -> &[(usize, f64)] {
        self.series.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.series(name).last().map(|&(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl MetricsSink for MemorySink {
    fn log_scalar(&mut self, name: &str, value: f64, step: usize) {
        self.series.entry(name.to_string()).or_default().push((step, value));
    }
}
