//! Layer Normalization
//!
//! Layer normalization applies the same normalize-then-scale/shift
//! transform as batch normalization, but the statistics are computed per
//! example across the feature dimension instead of per feature across the
//! batch. Swapping the reduction axis removes the batch dependency
//! entirely: there are no running statistics, and training and test
//! behavior are identical.
//!
//! ## Forward Pass
//!
//! ```text
//! 1. mean_i = E[x[i, :]]                (over features, per example)
//! 2. var_i  = E[(x[i, :] - mean_i)²]    (biased, divide by D)
//! 3. xhat   = (x - mean) / √(var + ε)
//! 4. y      = γ * xhat + β
//! ```
//!
//! ## Backward Pass
//!
//! Mean and variance depend on every element of the normalized row, so
//! the input gradient carries the same two correction terms as batch
//! normalization, reduced along the row instead of the column:
//!
//! ```text
//! grad_γ    = sum(grad_y * xhat)        (over examples)
//! grad_β    = sum(grad_y)
//! grad_xhat = grad_y * γ
//! grad_x    = (grad_xhat - E[grad_xhat] - xhat * E[grad_xhat * xhat]) / √(var + ε)
//! ```

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

/// Layer normalization layer
///
/// Normalizes each example across the feature dimension and applies a
/// learnable scale and shift.
pub struct LayerNorm {
    /// Scale parameter, shape `[features]`
    pub gamma: Tensor,
    /// Shift parameter, shape `[features]`
    pub beta: Tensor,
    /// Added to the variance before the square root
    pub eps: f64,
}

impl LayerNorm {
    /// Create a new layer with gamma initialized to 1, beta to 0, and
    /// `eps = 1e-5`
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Tensor::new(vec![1.0; features], vec![features]),
            beta: Tensor::zeros(vec![features]),
            eps: 1e-5,
        }
    }

    /// Build a layer from existing scale/shift parameters
    ///
    /// # Panics
    ///
    /// Panics if the parameters are not 1-D vectors of equal length.
    pub fn from_parts(gamma: Tensor, beta: Tensor) -> Self {
        assert_eq!(gamma.shape.len(), 1, "gamma must be 1-D");
        assert_eq!(gamma.shape, beta.shape, "gamma and beta shapes must match");
        Self {
            gamma,
            beta,
            eps: 1e-5,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input of shape `[batch, features]`
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `x` is not 2-D or its feature dimension does
    /// not match the layer parameters.
    ///
    /// A row whose `var + eps` underflows to zero is reported through
    /// `log::warn!`; the call itself still succeeds.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, LayerNormCache)> {
        if x.shape.len() != 2 {
            return Err(LayerError::ShapeMismatch {
                op: "layernorm_forward",
                expected: "(batch, features)".to_string(),
                actual: format!("{:?}", x.shape),
            });
        }
        let n = x.shape[0];
        let d = x.shape[1];
        if self.gamma.data.len() != d {
            return Err(LayerError::ShapeMismatch {
                op: "layernorm_forward",
                expected: format!("{} features", self.gamma.data.len()),
                actual: format!("{} (input shape {:?})", d, x.shape),
            });
        }

        let mut xhat = vec![0.0; n * d];
        let mut std = vec![0.0; n];
        let mut degenerate = 0usize;

        for i in 0..n {
            let row = &x.data[i * d..(i + 1) * d];
            let mean = row.iter().sum::<f64>() / d as f64;
            let var = row
                .iter()
                .map(|&v| {
                    let diff = v - mean;
                    diff * diff
                })
                .sum::<f64>()
                / d as f64;

            let denom = var + self.eps;
            if denom == 0.0 {
                degenerate += 1;
            }
            let std_val = denom.sqrt();
            std[i] = std_val;

            for j in 0..d {
                xhat[i * d + j] = (row[j] - mean) / std_val;
            }
        }

        if degenerate > 0 {
            log::warn!(
                "layernorm_forward: variance + eps underflowed to zero for {degenerate} of {n} \
                 examples before the square root"
            );
        }

        let xhat = Tensor::new(xhat, x.shape.clone());
        let out = xhat.mul(&self.gamma).add(&self.beta);
        let cache = LayerNormCache {
            xhat,
            std: Tensor::new(std, vec![n]),
        };
        Ok((out, cache))
    }

    /// Backward pass
    ///
    /// Computes gradients for gamma, beta, and the input. The input
    /// gradient accounts for each element's influence on its row's mean
    /// and variance.
    pub fn backward(&self, grad_out: &Tensor, cache: &LayerNormCache) -> LayerNormGradients {
        let n = grad_out.shape[0];
        let d = grad_out.shape[1];

        let mut grad_gamma = vec![0.0; d];
        let mut grad_beta = vec![0.0; d];
        for i in 0..n {
            for j in 0..d {
                let idx = i * d + j;
                grad_gamma[j] += grad_out.data[idx] * cache.xhat.data[idx];
                grad_beta[j] += grad_out.data[idx];
            }
        }

        // Backprop through the scale: grad_xhat = grad_out * gamma
        let grad_xhat = grad_out.mul(&self.gamma);

        // Backprop through the normalization, one example row at a time
        let mut grad_x_data = vec![0.0; n * d];
        for i in 0..n {
            let row_start = i * d;
            let grad_row = &grad_xhat.data[row_start..row_start + d];
            let xhat_row = &cache.xhat.data[row_start..row_start + d];
            let std_val = cache.std.data[i];

            let mean_grad: f64 = grad_row.iter().sum::<f64>() / d as f64;
            let mean_grad_x: f64 = grad_row
                .iter()
                .zip(xhat_row.iter())
                .map(|(g, x)| g * x)
                .sum::<f64>()
                / d as f64;

            for j in 0..d {
                grad_x_data[row_start + j] =
                    (grad_row[j] - mean_grad - xhat_row[j] * mean_grad_x) / std_val;
            }
        }

        LayerNormGradients {
            gamma: Tensor::new(grad_gamma, vec![d]),
            beta: Tensor::new(grad_beta, vec![d]),
            x: Tensor::new(grad_x_data, grad_out.shape.clone()),
        }
    }
}

/// Cache for the layer normalization backward pass
#[derive(Debug)]
pub struct LayerNormCache {
    /// Normalized input, before scale and shift
    pub xhat: Tensor,
    /// Per-example `√(var + ε)` used by the forward pass
    pub std: Tensor,
}

/// Gradients for layer normalization
pub struct LayerNormGradients {
    pub gamma: Tensor,
    pub beta: Tensor,
    /// Gradient to pass to the previous layer
    pub x: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::{numerical_gradient_tensor, rel_error};
    use approx::assert_relative_eq;

    #[test]
    fn test_forward_normalizes_each_row() {
        let x = Tensor::randn(vec![4, 6], 3.0, 2.0, 40);
        let layer = LayerNorm::new(6);

        let (out, _) = layer.forward(&x).unwrap();

        for i in 0..4 {
            let row = &out.data[i * 6..(i + 1) * 6];
            let mean = row.iter().sum::<f64>() / 6.0;
            let var = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / 6.0;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-10);
            assert_relative_eq!(var, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_forward_is_batch_independent() {
        // Normalizing per example means a row's output cannot change when
        // other rows do.
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 9.0, 9.0, 9.0], vec![2, 3]);
        let b = Tensor::new(vec![1.0, 2.0, 3.0, -5.0, 0.0, 5.0], vec![2, 3]);
        let layer = LayerNorm::new(3);

        let (out_a, _) = layer.forward(&a).unwrap();
        let (out_b, _) = layer.forward(&b).unwrap();
        assert_eq!(out_a.data[..3], out_b.data[..3]);
    }

    #[test]
    fn test_rejects_feature_mismatch() {
        let x = Tensor::zeros(vec![2, 4]);
        let layer = LayerNorm::new(3);
        let err = layer.forward(&x).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_gradient_check() {
        let x = Tensor::randn(vec![4, 5], 0.0, 2.0, 41);
        let dout = Tensor::randn(vec![4, 5], 0.0, 1.0, 42);
        let gamma = Tensor::randn(vec![5], 1.0, 0.3, 43);
        let beta = Tensor::randn(vec![5], 0.0, 0.5, 44);
        let layer = LayerNorm::from_parts(gamma.clone(), beta.clone());

        let (_, cache) = layer.forward(&x).unwrap();
        let grads = layer.backward(&dout, &cache);

        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.gamma.shape, gamma.shape);
        assert_eq!(grads.beta.shape, beta.shape);

        let dx_num = numerical_gradient_tensor(|v| layer.forward(v).unwrap().0, &x, &dout, 1e-5);
        assert!(rel_error(&grads.x, &dx_num) < 1e-6);

        let dgamma_num = numerical_gradient_tensor(
            |g| {
                let probe = LayerNorm::from_parts(g.clone(), beta.clone());
                probe.forward(&x).unwrap().0
            },
            &gamma,
            &dout,
            1e-5,
        );
        assert!(rel_error(&grads.gamma, &dgamma_num) < 1e-6);

        let dbeta_num = numerical_gradient_tensor(
            |b| {
                let probe = LayerNorm::from_parts(gamma.clone(), b.clone());
                probe.forward(&x).unwrap().0
            },
            &beta,
            &dout,
            1e-5,
        );
        assert!(rel_error(&grads.beta, &dbeta_num) < 1e-6);
    }
}
