//! Human-readable summary of a delta map

use super::pattern::{squared_norm, DeltaMap};
use serde::Serialize;
use std::fmt;

/// Number of parameters listed in [`DeltaSummary::top`].
pub const TOP_N: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaSummary {
    pub tensors: usize,
    pub elements: usize,
    pub total_norm: f64,
    /// Largest deltas by L2 norm, descending
    pub top: Vec<(String, f64)>,
}

impl DeltaSummary {
    pub fn of(deltas: &DeltaMap) -> Self {
        let mut norms: Vec<(String, f64)> =
            deltas.iter().map(|(k, t)| (k.clone(), squared_norm(t).sqrt())).collect();
        let total_norm = norms.iter().map(|(_, n)| n * n).sum::<f64>().sqrt();
        norms.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        norms.truncate(TOP_N);
        Self {
            tensors: deltas.len(),
            elements: deltas.values().map(|t| t.len()).sum(),
            total_norm,
            top: norms,
        }
    }
}

impl fmt::Display for DeltaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "tensors: {}", self.tensors)?;
        writeln!(f, "elements: {}", self.elements)?;
        writeln!(f, "total L2 norm: {:.6e}", self.total_norm)?;
        writeln!(f, "top {} by L2 norm:", self.top.len())?;
        for (i, (key, norm)) in self.top.iter().enumerate() {
            writeln!(f, "{:>3}. {norm:.6e}  {key}", i + 1)?;
        }
        Ok(())
    }
}
