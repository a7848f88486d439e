//! Inverted dropout

use crate::Tensor;
use rand::Rng;

/// Zero each element with probability `p` and rescale survivors by `1 / (1 - p)`.
///
/// Identity when not training or when `p == 0`.
pub fn dropout<R: Rng + ?Sized>(x: &Tensor, p: f32, training: bool, rng: &mut R) -> Tensor {
    if !training || p <= 0.0 {
        return x.clone();
    }
    if p >= 1.0 {
        return x.with_data(x.data().mapv(|_| 0.0));
    }
    let keep_scale = 1.0 / (1.0 - p);
    let data = x.data().mapv(|v| if rng.random::<f32>() < p { 0.0 } else { v * keep_scale });
    x.with_data(data)
}
