//! Per-sample regression loss components

use crate::error::{Error, Result};
use crate::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three tracked loss components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossComponent {
    Mse,
    Mae,
    LogCosh,
}

impl LossComponent {
    pub const ALL: [LossComponent; 3] = [Self::Mse, Self::Mae, Self::LogCosh];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mse => "mse",
            Self::Mae => "mae",
            Self::LogCosh => "log_cosh",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Mse => 0,
            Self::Mae => 1,
            Self::LogCosh => 2,
        }
    }
}

impl fmt::Display for LossComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `log(cosh(x))` without overflow for large `|x|`.
fn log_cosh(x: f64) -> f64 {
    let a = x.abs();
    a + (-2.0 * a).exp().ln_1p() - std::f64::consts::LN_2
}

/// Per-sample MSE, MAE and log-cosh of one batch.
///
/// The leading axis is the batch; every other axis is averaged per sample.
/// A 0-d or 1-d input is one value per sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossComponents {
    pub mse: Vec<f64>,
    pub mae: Vec<f64>,
    pub log_cosh: Vec<f64>,
}

impl LossComponents {
    pub fn compute(predictions: &Tensor, targets: &Tensor) -> Result<Self> {
        if predictions.shape() != targets.shape() {
            return Err(Error::ShapeMismatch {
                key: "targets".to_string(),
                expected: predictions.shape().to_vec(),
                actual: targets.shape().to_vec(),
            });
        }
        let batch = predictions.shape().first().copied().unwrap_or(1);
        if batch == 0 {
            return Ok(Self::default());
        }
        let per_sample = predictions.len() / batch;

        let pred = predictions.to_vec();
        let target = targets.to_vec();
        let mut out = Self {
            mse: Vec::with_capacity(batch),
            mae: Vec::with_capacity(batch),
            log_cosh: Vec::with_capacity(batch),
        };
        for (p, t) in pred.chunks(per_sample.max(1)).zip(target.chunks(per_sample.max(1))) {
            let n = p.len() as f64;
            let (mut se, mut ae, mut lc) = (0.0, 0.0, 0.0);
            for (&p, &t) in p.iter().zip(t) {
                let d = f64::from(p) - f64::from(t);
                se += d * d;
                ae += d.abs();
                lc += log_cosh(d);
            }
            out.mse.push(se / n);
            out.mae.push(ae / n);
            out.log_cosh.push(lc / n);
        }
        Ok(out)
    }

    pub fn get(&self, component: LossComponent) -> &[f64] {
        match component {
            LossComponent::Mse => &self.mse,
            LossComponent::Mae => &self.mae,
            LossComponent::LogCosh => &self.log_cosh,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.mse.len()
    }

    /// Batch mean of one component; 0 for an empty batch.
    pub fn mean(&self, component: LossComponent) -> f64 {
        let values = self.get(component);
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Non-negative weights over the three components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub mse: f64,
    pub mae: f64,
    pub log_cosh: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

impl LossWeights {
    pub fn uniform() -> Self {
        Self::from_array([1.0 / 3.0; 3])
    }

    pub fn from_array([mse, mae, log_cosh]: [f64; 3]) -> Self {
        Self { mse, mae, log_cosh }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.mse, self.mae, self.log_cosh]
    }

    pub fn get(&self, component: LossComponent) -> f64 {
        self.to_array()[component.index()]
    }

    pub fn sum(&self) -> f64 {
        self.mse + self.mae + self.log_cosh
    }

    /// Weighted sum of the batch-mean components.
    pub fn combine(&self, components: &LossComponents) -> f64 {
        LossComponent::ALL.iter().map(|&c| self.get(c) * components.mean(c)).sum()
    }
}
