//! Host-side tensor used as the stand-in for the differentiable backend
//!
//! A [`Tensor`] is a dense `f32` array plus the metadata the adapter system
//! needs to reason about placement: logical dtype, device and whether the
//! tensor is trainable.

mod device;


pub use device::{DType, Device};

use crate::error::{Error, Result};
use ndarray::{ArrayD, IxDyn};

/// Dense n-dimensional `f32` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: ArrayD<f32>,
    dtype: DType,
    device: Device,
    requires_grad: bool,
}

impl Tensor {
    /// Wrap an ndarray on the CPU as `f32`.
    pub fn new(data: ArrayD<f32>) -> Self {
        Self { data, dtype: DType::F32, device: Device::Cpu, requires_grad: false }
    }

    /// Build a tensor from a flat vector in row-major order.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::InvalidArgument(format!(
                "cannot view {} values as shape {shape:?} ({expected} values)",
                data.len()
            )));
        }
        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| Error::InvalidArgument(format!("invalid tensor shape {shape:?}: {e}")))?;
        Ok(Self::new(array))
    }

    /// Build a tensor by calling `f` once per element in row-major order.
    pub fn from_fn(shape: &[usize], f: impl FnMut() -> f32) -> Self {
        Self::new(ArrayD::from_shape_simple_fn(IxDyn(shape), f))
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn full(shape: &[usize], value: f32) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Zero-dimensional tensor holding one value.
    pub fn scalar(value: f32) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut ArrayD<f32> {
        &mut self.data
    }

    pub fn into_data(self) -> ArrayD<f32> {
        self.data
    }

    /// Elements in row-major order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// The single value of a one-element tensor.
    pub fn scalar_value(&self) -> Option<f32> {
        if self.len() == 1 {
            self.data.iter().next().copied()
        } else {
            None
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
    }

    /// Builder form of [`Tensor::set_requires_grad`].
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    /// Storage size at the tensor's dtype.
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype.size_in_bytes()
    }

    /// Copy this tensor to `device` at `dtype`.
    ///
    /// Fails with [`Error::ResourceExhausted`] when the converted tensor does
    /// not fit the device's memory limit; the source tensor is untouched.
    pub fn to(&self, device: Device, dtype: DType) -> Result<Self> {
        let bytes = self.len() * dtype.size_in_bytes();
        if !device.can_hold(bytes) {
            return Err(Error::ResourceExhausted(format!(
                "tensor {:?} needs {bytes} bytes on {device}",
                self.shape()
            )));
        }
        let data = if dtype == self.dtype || dtype == DType::F32 {
            self.data.clone()
        } else {
            self.data.mapv(|v| dtype.round(v))
        };
        Ok(Self { data, dtype, device, requires_grad: self.requires_grad })
    }

    /// Reshape to `shape`, keeping metadata.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let data = self
            .data
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(shape.to_vec())
            .map_err(|e| {
                Error::InvalidArgument(format!(
                    "cannot reshape {:?} into {shape:?}: {e}",
                    self.shape()
                ))
            })?;
        Ok(Self { data, ..self.metadata_only() })
    }

    /// Same metadata with a new payload.
    pub fn with_data(&self, data: ArrayD<f32>) -> Self {
        Self { data, ..self.metadata_only() }
    }

    fn metadata_only(&self) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(&[0])),
            dtype: self.dtype,
            device: self.device,
            requires_grad: self.requires_grad,
        }
    }

    /// Euclidean norm over all elements.
    pub fn l2_norm(&self) -> f32 {
        self.data.iter().map(|&v| f64::from(v) * f64::from(v)).sum::<f64>().sqrt() as f32
    }

    /// Elementwise difference `self - other`.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        if self.shape() != other.shape() {
            return Err(Error::ShapeMismatch {
                key: "sub".to_string(),
                expected: self.shape().to_vec(),
                actual: other.shape().to_vec(),
            });
        }
        Ok(self.with_data(&self.data - &other.data))
    }
}
