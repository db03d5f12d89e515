//! Activation Functions
//!
//! This module provides the rectified linear activation and its
//! derivative for backpropagation.
//!
//! ## ReLU (Rectified Linear Unit)
//!
//! ```text
//! relu(x) = max(x, 0)
//! ```
//!
//! The derivative is 1 where the input was positive and 0 elsewhere. At
//! exactly zero the function is not differentiable; this implementation
//! picks the subgradient 0 there, and the backward pass applies the same
//! choice so the pair stays consistent under gradient checking.

use crate::tensor::Tensor;
use rayon::prelude::*;

/// ReLU activation (forward pass)
///
/// Applies `max(x, 0)` element-wise. Works on tensors of any shape.
///
/// # Returns
///
/// Tuple of (output, cache). The cache is the original input, which the
/// backward pass consults for the sign of each element.
pub fn relu_forward(x: &Tensor) -> (Tensor, Tensor) {
    let result = x.data.par_iter().map(|&val| val.max(0.0)).collect();
    (Tensor::new(result, x.shape.clone()), x.clone())
}

/// ReLU derivative (backward pass)
///
/// # Arguments
///
/// * `grad_out` - Gradient from the next layer, same shape as the input
/// * `cache` - Original input from the forward pass
///
/// # Returns
///
/// Gradient with respect to input: `grad_out` where the input was
/// positive, zero elsewhere.
pub fn relu_backward(grad_out: &Tensor, cache: &Tensor) -> Tensor {
    let grad_data: Vec<f64> = cache
        .data
        .par_iter()
        .zip(&grad_out.data)
        .map(|(&x_val, &grad_val)| if x_val > 0.0 { grad_val } else { 0.0 })
        .collect();

    Tensor::new(grad_data, cache.shape.clone())
}
