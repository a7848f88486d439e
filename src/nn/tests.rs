//! Tests for base layers

use super::*;
use crate::Tensor;
use approx::assert_abs_diff_eq;

fn t(data: Vec<f32>, shape: &[usize]) -> Tensor {
    Tensor::from_vec(data, shape).unwrap()
}

#[test]
fn test_linear_forward_matches_manual() {
    // W = [[1, 2], [3, 4], [5, 6]], b = [0.5, 0, -1]
    let layer = Linear::new(
        t(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]),
        Some(t(vec![0.5, 0.0, -1.0], &[3])),
    )
    .unwrap();
    let x = t(vec![1.0, -1.0, 2.0, 0.5], &[2, 2]);
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.shape(), &[2, 3]);
    assert_eq!(y.to_vec(), vec![-0.5, -1.0, -2.0, 3.5, 8.0, 12.0]);
}

#[test]
fn test_linear_keeps_leading_dims() {
    let layer = Linear::new(Tensor::full(&[4, 3], 1.0), None).unwrap();
    let x = Tensor::full(&[2, 5, 3], 1.0);
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.shape(), &[2, 5, 4]);
    assert!(y.to_vec().iter().all(|&v| (v - 3.0).abs() < 1e-6));
}

#[test]
fn test_linear_rejects_wrong_width() {
    let layer = Linear::new(Tensor::zeros(&[4, 3]), None).unwrap();
    assert!(layer.forward(&Tensor::zeros(&[2, 5])).is_err());
    assert!(Linear::new(Tensor::zeros(&[4, 3]), Some(Tensor::zeros(&[3]))).is_err());
}

#[test]
fn test_conv2d_identity_kernel() {
    // 1x1 kernel of 1.0 copies the single channel.
    let conv = Conv2d::new(Tensor::full(&[1, 1, 1, 1], 1.0), None, Conv2dParams::default()).unwrap();
    let x = t((0..9).map(|v| v as f32).collect(), &[1, 1, 3, 3]);
    let y = conv.forward(&x).unwrap();
    assert_eq!(y, x);
}

#[test]
fn test_conv2d_padding_and_stride() {
    // 3x3 box filter, padding 1, stride 2 over a 4x4 image of ones.
    let params = Conv2dParams::default().with_padding(1).with_stride(2);
    let conv = Conv2d::new(Tensor::full(&[1, 1, 3, 3], 1.0), Some(t(vec![1.0], &[1])), params).unwrap();
    let y = conv.forward(&Tensor::full(&[1, 1, 4, 4], 1.0)).unwrap();
    assert_eq!(y.shape(), &[1, 1, 2, 2]);
    // Top-left window sees 4 ones (corner), others see 6 or 9.
    assert_eq!(y.to_vec(), vec![5.0, 7.0, 7.0, 10.0]);
}

#[test]
fn test_conv2d_groups_isolate_channels() {
    // Two groups, each output channel sees only its own input channel.
    let weight = t(vec![2.0, 3.0], &[2, 1, 1, 1]);
    let conv = Conv2d::new(weight, None, Conv2dParams::default().with_groups(2)).unwrap();
    assert_eq!(conv.in_channels(), 2);
    let x = t(vec![1.0, 10.0], &[1, 2, 1, 1]);
    let y = conv.forward(&x).unwrap();
    assert_eq!(y.to_vec(), vec![2.0, 30.0]);
}

#[test]
fn test_conv2d_dilation_extent() {
    let params = Conv2dParams::default().with_dilation(2);
    let conv = Conv2d::new(Tensor::full(&[1, 1, 3, 3], 1.0), None, params).unwrap();
    let y = conv.forward(&Tensor::full(&[1, 1, 5, 5], 1.0)).unwrap();
    assert_eq!(y.shape(), &[1, 1, 1, 1]);
    assert_abs_diff_eq!(y.to_vec()[0], 9.0, epsilon = 1e-6);
}

#[test]
fn test_conv2d_rejects_bad_groups() {
    let err = Conv2d::new(Tensor::zeros(&[3, 1, 1, 1]), None, Conv2dParams::default().with_groups(2));
    assert!(err.is_err());
}

#[test]
fn test_other_layer_is_passthrough() {
    let layer = Layer::other("GroupNorm");
    assert_eq!(layer.kind(), None);
    assert_eq!(layer.type_name(), "GroupNorm");
    let x = Tensor::full(&[3], 1.5);
    assert_eq!(layer.forward(&x).unwrap(), x);
}

#[test]
fn test_model_layer_specs_skip_unsupported() {
    let model = FrozenModel::new()
        .with_layer("down.0", Linear::new(Tensor::zeros(&[4, 8]), None).unwrap())
        .with_layer("norm", Layer::other("LayerNorm"))
        .with_layer(
            "conv_in",
            Conv2d::new(Tensor::zeros(&[8, 3, 3, 3]), None, Conv2dParams::default().with_padding(1)).unwrap(),
        );
    assert_eq!(model.len(), 3);

    let specs = model.layer_specs();
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].name, "down.0");
    assert_eq!(specs[0].shape, LayerShape::Dense { in_features: 8, out_features: 4 });
    assert_eq!(specs[1].kind, LayerKind::GridConv);
    assert_eq!(specs[1].shape.fan_in(), 27);
}
