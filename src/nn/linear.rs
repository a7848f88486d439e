//! Dense layer and the `x · Wᵀ + b` primitive

use crate::error::{Error, Result};
use crate::nn::Forward;
use crate::Tensor;
use ndarray::{ArrayView1, ArrayView2, Ix1, Ix2};

/// Frozen dense layer: `weight` is `[out_features, in_features]`.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Create a dense layer, checking that `bias` matches the output width.
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let (out_features, _) = matrix_dims(&weight, "weight")?;
        if let Some(b) = &bias {
            if b.shape() != [out_features] {
                return Err(Error::ShapeMismatch {
                    key: "bias".to_string(),
                    expected: vec![out_features],
                    actual: b.shape().to_vec(),
                });
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl Forward for Linear {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        linear(x, &self.weight, self.bias.as_ref())
    }
}

/// `[rows, cols]` of a 2-D tensor.
pub(crate) fn matrix_dims(t: &Tensor, key: &str) -> Result<(usize, usize)> {
    match t.shape() {
        [rows, cols] => Ok((*rows, *cols)),
        other => Err(Error::InvalidArgument(format!(
            "{key} must be 2-D, got shape {other:?}"
        ))),
    }
}

pub(crate) fn as_matrix<'a>(t: &'a Tensor, key: &str) -> Result<ArrayView2<'a, f32>> {
    t.data()
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| Error::InvalidArgument(format!("{key} must be 2-D: {e}")))
}

pub(crate) fn as_vector<'a>(t: &'a Tensor, key: &str) -> Result<ArrayView1<'a, f32>> {
    t.data()
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|e| Error::InvalidArgument(format!("{key} must be 1-D: {e}")))
}

/// Apply a dense projection over the last axis of `x`.
///
/// `x` is `[..., in]`, `weight` is `[out, in]`, the result is `[..., out]`.
pub fn linear(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let (out_features, in_features) = matrix_dims(weight, "weight")?;
    let x_shape = x.shape();
    if x_shape.last() != Some(&in_features) {
        return Err(Error::ShapeMismatch {
            key: "linear input".to_string(),
            expected: vec![in_features],
            actual: x_shape.to_vec(),
        });
    }

    let rows = x.len() / in_features.max(1);
    let x2 = x
        .data()
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((rows, in_features))
        .map_err(|e| Error::InvalidArgument(format!("linear input reshape failed: {e}")))?;
    let w = as_matrix(weight, "weight")?;

    let mut y = x2.dot(&w.t());
    if let Some(b) = bias {
        y += &as_vector(b, "bias")?;
    }

    let mut out_shape = x_shape[..x_shape.len() - 1].to_vec();
    out_shape.push(out_features);
    Tensor::new(y.into_dyn()).reshape(&out_shape)
}
