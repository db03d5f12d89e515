//! Affine Layer (Fully Connected)
//!
//! The affine layer is the fundamental building block of feed-forward
//! networks. It performs an affine transformation: y = x @ W + b
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [N, d_1, ..., d_k]  (flattened per example to [N, D])
//! Weight: W [D, M]
//! Bias:   b [M]
//! Output: y = x_flat @ W + b  [N, M]
//! ```
//!
//! The input may carry trailing spatial dimensions (for example the
//! output of a convolution); every non-batch dimension is flattened into
//! a single feature vector of length `D = d_1 * ... * d_k`.
//!
//! ## Backward Pass
//!
//! Using the chain rule:
//! ```text
//! grad_W = x_flat^T @ grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = grad_y @ W^T, reshaped to the original input shape
//! ```

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

/// Affine (fully connected) layer
///
/// Performs `y = x_flat @ W + b` where:
/// - W: weight matrix `[in_features, out_features]`
/// - b: bias vector `[out_features]`
pub struct Affine {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Affine {
    /// Create a new affine layer with Gaussian-initialized weights
    ///
    /// Weights are drawn with standard deviation `sqrt(2 / in_features)`,
    /// which keeps activation variance stable when the layer feeds a
    /// rectifier. Bias starts at zero.
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        let scale = (2.0 / in_features as f64).sqrt();
        Self {
            weight: Tensor::randn(vec![in_features, out_features], 0.0, scale, seed),
            bias: Tensor::zeros(vec![out_features]),
        }
    }

    /// Build a layer from existing parameters
    ///
    /// # Panics
    ///
    /// Panics if `weight` is not 2-D or `bias` length does not match its
    /// column count.
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Self {
        assert_eq!(weight.shape.len(), 2, "weight must be 2-D");
        assert_eq!(
            bias.data.len(),
            weight.shape[1],
            "bias length must match weight columns"
        );
        Self { weight, bias }
    }

    /// Forward pass
    ///
    /// Flattens every non-batch dimension of `x`, computes
    /// `x_flat @ W + b`, and caches the original input for the backward
    /// pass.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the flattened feature count differs from the
    /// weight's row count.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, AffineCache)> {
        let n = x.shape[0];
        let d = x.data.len() / n;
        if d != self.weight.shape[0] {
            return Err(LayerError::ShapeMismatch {
                op: "affine_forward",
                expected: format!("{} input features", self.weight.shape[0]),
                actual: format!("{} (input shape {:?})", d, x.shape),
            });
        }

        let x_flat = x.reshape(&[n, d]);
        let y = x_flat.matmul(&self.weight).add(&self.bias);
        let cache = AffineCache { x: x.clone() };
        Ok((y, cache))
    }

    /// Backward pass
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Gradient from the next layer `[N, out_features]`
    /// * `cache` - Cached values from the forward pass
    ///
    /// # Returns
    ///
    /// Gradients for weight, bias, and input. The input gradient has the
    /// original (unflattened) input shape.
    pub fn backward(&self, grad_out: &Tensor, cache: &AffineCache) -> AffineGradients {
        let n = cache.x.shape[0];
        let d = cache.x.data.len() / n;
        let x_flat = cache.x.reshape(&[n, d]);

        // grad_W = x_flat^T @ grad_out
        let grad_weight = x_flat.transpose().matmul(grad_out);

        // grad_b = sum(grad_out) over the batch
        let m = self.bias.data.len();
        let grad_bias_data: Vec<f64> = (0..m)
            .map(|j| {
                let mut sum = 0.0;
                for row in 0..grad_out.shape[0] {
                    sum += grad_out.data[row * m + j];
                }
                sum
            })
            .collect();
        let grad_bias = Tensor::new(grad_bias_data, self.bias.shape.clone());

        // grad_x = grad_out @ W^T, restored to the caller's layout
        let grad_x = grad_out
            .matmul(&self.weight.transpose())
            .reshape(&cache.x.shape);

        AffineGradients {
            weight: grad_weight,
            bias: grad_bias,
            x: grad_x,
        }
    }
}

/// Cache for the affine backward pass
///
/// Holds the original, unflattened input.
#[derive(Debug)]
pub struct AffineCache {
    pub x: Tensor,
}

/// Gradients for the affine layer
pub struct AffineGradients {
    pub weight: Tensor,
    pub bias: Tensor,
    /// Gradient to pass to the previous layer
    pub x: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::{numerical_gradient_tensor, rel_error};

    #[test]
    fn test_forward_known_values() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
        let w = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
        let b = Tensor::zeros(vec![2]);
        let layer = Affine::from_parts(w, b);

        let (out, _) = layer.forward(&x).unwrap();
        assert_eq!(out.shape, vec![2, 2]);
        assert_eq!(out.data, vec![4.0, 5.0, 10.0, 11.0]);
    }

    #[test]
    fn test_forward_flattens_spatial_input() {
        let x = Tensor::randn(vec![2, 3, 2, 2], 0.0, 1.0, 3);
        let layer = Affine::new(12, 5, 4);
        let (out, cache) = layer.forward(&x).unwrap();
        assert_eq!(out.shape, vec![2, 5]);
        // The cache keeps the caller's layout
        assert_eq!(cache.x.shape, vec![2, 3, 2, 2]);
    }

    #[test]
    fn test_forward_rejects_feature_mismatch() {
        let x = Tensor::zeros(vec![2, 7]);
        let layer = Affine::new(3, 2, 0);
        let err = layer.forward(&x).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_gradient_check() {
        let x = Tensor::randn(vec![4, 3, 2], 0.0, 1.0, 20);
        let layer = Affine::new(6, 5, 21);
        let dout = Tensor::randn(vec![4, 5], 0.0, 1.0, 22);

        let (_, cache) = layer.forward(&x).unwrap();
        let grads = layer.backward(&dout, &cache);

        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.weight.shape, layer.weight.shape);
        assert_eq!(grads.bias.shape, layer.bias.shape);

        let dx_num =
            numerical_gradient_tensor(|v| layer.forward(v).unwrap().0, &x, &dout, 1e-5);
        assert!(rel_error(&grads.x, &dx_num) < 1e-7);

        let dw_num = numerical_gradient_tensor(
            |w| {
                let probe = Affine::from_parts(w.clone(), layer.bias.clone());
                probe.forward(&x).unwrap().0
            },
            &layer.weight,
            &dout,
            1e-5,
        );
        assert!(rel_error(&grads.weight, &dw_num) < 1e-7);

        let db_num = numerical_gradient_tensor(
            |b| {
                let probe = Affine::from_parts(layer.weight.clone(), b.clone());
                probe.forward(&x).unwrap().0
            },
            &layer.bias,
            &dout,
            1e-5,
        );
        assert!(rel_error(&grads.bias, &db_num) < 1e-7);
    }
}
