//! Grid convolution layer (NCHW) and the direct `conv2d` primitive

use crate::error::{Error, Result};
use crate::nn::Forward;
use crate::Tensor;
use ndarray::{Array4, Ix4};
use serde::{Deserialize, Serialize};

/// Geometry shared by a convolution and any adapter that mirrors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conv2dParams {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub groups: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self { stride: (1, 1), padding: (0, 0), dilation: (1, 1), groups: 1 }
    }
}

impl Conv2dParams {
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = (stride, stride);
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = (padding, padding);
        self
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = (dilation, dilation);
        self
    }

    pub fn with_groups(mut self, groups: usize) -> Self {
        self.groups = groups;
        self
    }

    /// Same stride/padding/dilation, no grouping.
    pub fn ungrouped(self) -> Self {
        Self { groups: 1, ..self }
    }

    /// Pointwise (1x1, stride 1) projection.
    pub fn pointwise() -> Self {
        Self::default()
    }
}

/// Frozen 2-D convolution: `weight` is `[out, in / groups, kh, kw]`.
#[derive(Debug, Clone)]
pub struct Conv2d {
    weight: Tensor,
    bias: Option<Tensor>,
    params: Conv2dParams,
}

impl Conv2d {
    pub fn new(weight: Tensor, bias: Option<Tensor>, params: Conv2dParams) -> Result<Self> {
        let [out_channels, _, _, _] = kernel_dims(&weight)?;
        if params.groups == 0 || out_channels % params.groups != 0 {
            return Err(Error::InvalidArgument(format!(
                "groups {} must divide out_channels {out_channels}",
                params.groups
            )));
        }
        if params.stride.0 == 0 || params.stride.1 == 0 {
            return Err(Error::InvalidArgument("stride must be positive".to_string()));
        }
        if let Some(b) = &bias {
            if b.shape() != [out_channels] {
                return Err(Error::ShapeMismatch {
                    key: "bias".to_string(),
                    expected: vec![out_channels],
                    actual: b.shape().to_vec(),
                });
            }
        }
        Ok(Self { weight, bias, params })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn params(&self) -> Conv2dParams {
        self.params
    }

    pub fn out_channels(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn in_channels(&self) -> usize {
        self.weight.shape()[1] * self.params.groups
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        (self.weight.shape()[2], self.weight.shape()[3])
    }
}

impl Forward for Conv2d {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        conv2d(x, &self.weight, self.bias.as_ref(), self.params)
    }
}

pub(crate) fn kernel_dims(weight: &Tensor) -> Result<[usize; 4]> {
    match weight.shape() {
        [o, i, kh, kw] => Ok([*o, *i, *kh, *kw]),
        other => Err(Error::InvalidArgument(format!(
            "convolution weight must be 4-D, got shape {other:?}"
        ))),
    }
}

fn output_extent(input: usize, kernel: usize, stride: usize, padding: usize, dilation: usize) -> usize {
    let span = dilation * (kernel.saturating_sub(1)) + 1;
    let padded = input + 2 * padding;
    if padded < span {
        0
    } else {
        (padded - span) / stride + 1
    }
}

/// Direct 2-D convolution over an NCHW batch.
pub fn conv2d(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>, params: Conv2dParams) -> Result<Tensor> {
    let [out_c, in_per_group, kh, kw] = kernel_dims(weight)?;
    let input = x
        .data()
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|e| Error::InvalidArgument(format!("conv2d input must be NCHW: {e}")))?;
    let (batch, channels, height, width) = input.dim();
    let groups = params.groups.max(1);

    if channels != in_per_group * groups {
        return Err(Error::ShapeMismatch {
            key: "conv2d input channels".to_string(),
            expected: vec![in_per_group * groups],
            actual: vec![channels],
        });
    }
    if out_c % groups != 0 {
        return Err(Error::InvalidArgument(format!(
            "groups {groups} must divide out_channels {out_c}"
        )));
    }

    let kernel = weight
        .data()
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|e| Error::InvalidArgument(format!("conv2d weight: {e}")))?;
    let bias = bias.map(|b| b.to_vec());

    let (sh, sw) = params.stride;
    let (ph, pw) = params.padding;
    let (dh, dw) = params.dilation;
    let out_h = output_extent(height, kh, sh, ph, dh);
    let out_w = output_extent(width, kw, sw, pw, dw);
    let out_per_group = out_c / groups;

    let mut out = Array4::<f32>::zeros((batch, out_c, out_h, out_w));
    for n in 0..batch {
        for oc in 0..out_c {
            let group = oc / out_per_group;
            let base = bias.as_ref().map_or(0.0, |b| b[oc]);
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = base;
                    for ic in 0..in_per_group {
                        let c = group * in_per_group + ic;
                        for ky in 0..kh {
                            let iy = (oy * sh + ky * dh) as isize - ph as isize;
                            if iy < 0 || iy >= height as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (ox * sw + kx * dw) as isize - pw as isize;
                                if ix < 0 || ix >= width as isize {
                                    continue;
                                }
                                acc += input[[n, c, iy as usize, ix as usize]] * kernel[[oc, ic, ky, kx]];
                            }
                        }
                    }
                    out[[n, oc, oy, ox]] = acc;
                }
            }
        }
    }

    Ok(Tensor::new(out.into_dyn()))
}
