//! Batch Normalization
//!
//! Batch normalization normalizes each feature to zero mean and unit
//! variance across the minibatch, then applies a learnable scale (gamma)
//! and shift (beta). Normalizing per feature keeps activation
//! distributions stable as earlier layers move during training.
//!
//! ## Forward Pass (training)
//!
//! ```text
//! 1. mean_j = E[x[:, j]]                       (over the batch)
//! 2. var_j  = E[(x[:, j] - mean_j)²]           (biased, divide by N)
//! 3. xhat   = (x - mean) / √(var + ε)
//! 4. y      = γ * xhat + β
//! ```
//!
//! Normalization always uses the statistics of the current batch. As a
//! side effect, exponentially decayed running statistics are folded into
//! the caller-owned [`BatchNormState`]:
//!
//! ```text
//! running = momentum * running + (1 - momentum) * sample
//! ```
//!
//! At test time the stored running statistics replace the batch
//! statistics and nothing is mutated, so a single example normalizes the
//! same way regardless of what it is batched with.
//!
//! ## Backward Pass
//!
//! Every output element depends on every input element of its feature
//! column through the shared mean and variance, so the input gradient is
//! not elementwise. The algebra collapses to a closed form per column:
//!
//! ```text
//! grad_γ    = sum(grad_y * xhat)
//! grad_β    = sum(grad_y)
//! grad_xhat = grad_y * γ
//! grad_x    = (grad_xhat - E[grad_xhat] - xhat * E[grad_xhat * xhat]) / √(var + ε)
//! ```
//!
//! The two expectation terms account for each element's influence on the
//! column mean and variance respectively.

use crate::error::{LayerError, Result};
use crate::layers::Mode;
use crate::tensor::Tensor;

/// Caller-owned configuration and state for a batch normalization layer
///
/// The external model creates one of these per normalization layer and
/// threads it through every forward call. In [`Mode::Train`] the forward
/// pass rewrites `running_mean` and `running_var` in place; in
/// [`Mode::Test`] the block is read-only. The update is a non-atomic
/// read-modify-write, so concurrent training-mode forwards on the same
/// block need external synchronization.
#[derive(Clone, Debug)]
pub struct BatchNormState {
    pub mode: Mode,
    /// Added to the variance before the square root
    pub eps: f64,
    /// Decay factor for the running statistics
    pub momentum: f64,
    /// Exponentially decayed per-feature mean, shape `[features]`
    pub running_mean: Tensor,
    /// Exponentially decayed per-feature (biased) variance, shape `[features]`
    pub running_var: Tensor,
}

impl BatchNormState {
    /// Fresh training-mode state with zeroed statistics, `eps = 1e-5`,
    /// `momentum = 0.9`
    pub fn new(features: usize) -> Self {
        Self {
            mode: Mode::Train,
            eps: 1e-5,
            momentum: 0.9,
            running_mean: Tensor::zeros(vec![features]),
            running_var: Tensor::zeros(vec![features]),
        }
    }
}

/// Batch normalization layer
///
/// Owns the learnable per-feature scale and shift. Running statistics
/// live in the caller's [`BatchNormState`], not in the layer.
pub struct BatchNorm {
    /// Scale parameter, shape `[features]`
    pub gamma: Tensor,
    /// Shift parameter, shape `[features]`
    pub beta: Tensor,
}

impl BatchNorm {
    /// Create a new layer with gamma initialized to 1 and beta to 0
    pub fn new(features: usize) -> Self {
        Self {
            gamma: Tensor::new(vec![1.0; features], vec![features]),
            beta: Tensor::zeros(vec![features]),
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
        Self { gamma, beta }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input of shape `[batch, features]`
    /// * `state` - Caller-owned mode, eps, momentum and running statistics
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `x` is not 2-D, or its feature dimension does
    /// not match the layer parameters or the state's statistics.
    ///
    /// A feature column whose `var + eps` underflows to zero is reported
    /// through `log::warn!` and produces non-finite output for that
    /// column; the call itself still succeeds.
    pub fn forward(&self, x: &Tensor, state: &mut BatchNormState) -> Result<(Tensor, BatchNormCache)> {
        self.validate("batchnorm_forward", x, state)?;
        let n = x.shape[0];
        let d = x.shape[1];

        let mut xhat = vec![0.0; n * d];
        let mut std = vec![0.0; d];
        let mut degenerate = 0usize;

        match state.mode {
            Mode::Train => {
                for j in 0..d {
                    let mut sum = 0.0;
                    for i in 0..n {
                        sum += x.data[i * d + j];
                    }
                    let mean = sum / n as f64;

                    let mut var = 0.0;
                    for i in 0..n {
                        let diff = x.data[i * d + j] - mean;
                        var += diff * diff;
                    }
                    var /= n as f64;

                    let denom = var + state.eps;
                    if denom == 0.0 {
                        degenerate += 1;
                    }
                    let std_val = denom.sqrt();
                    std[j] = std_val;

                    for i in 0..n {
                        xhat[i * d + j] = (x.data[i * d + j] - mean) / std_val;
                    }

                    // Fold this batch into the caller's running estimates
                    state.running_mean.data[j] =
                        state.momentum * state.running_mean.data[j] + (1.0 - state.momentum) * mean;
                    state.running_var.data[j] =
                        state.momentum * state.running_var.data[j] + (1.0 - state.momentum) * var;
                }
            }
            Mode::Test => {
                for j in 0..d {
                    let mean = state.running_mean.data[j];
                    let denom = state.running_var.data[j] + state.eps;
                    if denom == 0.0 {
                        degenerate += 1;
                    }
                    let std_val = denom.sqrt();
                    std[j] = std_val;

                    for i in 0..n {
                        xhat[i * d + j] = (x.data[i * d + j] - mean) / std_val;
                    }
                }
            }
        }

        if degenerate > 0 {
            log::warn!(
                "batchnorm_forward: variance + eps underflowed to zero for {degenerate} of {d} \
                 features before the square root"
            );
        }

        let xhat = Tensor::new(xhat, x.shape.clone());
        let out = xhat.mul(&self.gamma).add(&self.beta);
        let cache = BatchNormCache {
            xhat,
            std: Tensor::new(std, vec![d]),
        };
        Ok((out, cache))
    }

    /// Backward pass
    ///
    /// Expects a cache produced by a training-mode forward: the input
    /// gradient below differentiates through the batch statistics, which
    /// at test time are constants.
    ///
    /// # Returns
    ///
    /// Gradients for gamma, beta, and input.
    pub fn backward(&self, grad_out: &Tensor, cache: &BatchNormCache) -> BatchNormGradients {
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

        // Backprop through the normalization, one feature column at a time
        let mut grad_x_data = vec![0.0; n * d];
        for j in 0..d {
            let mut mean_grad = 0.0;
            let mut mean_grad_x = 0.0;
            for i in 0..n {
                let idx = i * d + j;
                mean_grad += grad_xhat.data[idx];
                mean_grad_x += grad_xhat.data[idx] * cache.xhat.data[idx];
            }
            mean_grad /= n as f64;
            mean_grad_x /= n as f64;

            let std_val = cache.std.data[j];
            for i in 0..n {
                let idx = i * d + j;
                grad_x_data[idx] = (grad_xhat.data[idx]
                    - mean_grad
                    - cache.xhat.data[idx] * mean_grad_x)
                    / std_val;
            }
        }

        BatchNormGradients {
            gamma: Tensor::new(grad_gamma, vec![d]),
            beta: Tensor::new(grad_beta, vec![d]),
            x: Tensor::new(grad_x_data, grad_out.shape.clone()),
        }
    }

    fn validate(&self, op: &'static str, x: &Tensor, state: &BatchNormState) -> Result<()> {
        if x.shape.len() != 2 {
            return Err(LayerError::ShapeMismatch {
                op,
                expected: "(batch, features)".to_string(),
                actual: format!("{:?}", x.shape),
            });
        }
        let d = x.shape[1];
        if self.gamma.data.len() != d || state.running_mean.data.len() != d
            || state.running_var.data.len() != d
        {
            return Err(LayerError::ShapeMismatch {
                op,
                expected: format!("{} features", self.gamma.data.len()),
                actual: format!(
                    "input has {}, running statistics have {}/{}",
                    d,
                    state.running_mean.data.len(),
                    state.running_var.data.len()
                ),
            });
        }
        Ok(())
    }
}

/// Cache for the batch normalization backward pass
#[derive(Debug)]
pub struct BatchNormCache {
    /// Normalized input, before scale and shift
    pub xhat: Tensor,
    /// Per-feature `√(var + ε)` used by the forward pass
    pub std: Tensor,
}

/// Gradients for batch normalization
pub struct BatchNormGradients {
    pub gamma: Tensor,
    pub beta: Tensor,
    /// Gradient to pass to the previous layer
    pub x: Tensor,
}
