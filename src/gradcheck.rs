//! Numerical Gradient Checking
//!
//! Every backward pass in this library is a hand-derived closed form, so
//! each one is verified against a centered finite difference of its
//! paired forward pass:
//!
//! ```text
//! df/dx_i ≈ (f(x + h·e_i) - f(x - h·e_i)) / (2h)
//! ```
//!
//! The centered form has truncation error of order h², which at the
//! default `h = 1e-5` puts agreement with a correct analytic gradient
//! around 1e-7 relative error in `f64`. The tests in each layer module
//! use these helpers; they are exported because callers extending the
//! library with their own layers need the same machinery.

use crate::tensor::Tensor;

/// Maximum relative error between two tensors of the same shape
///
/// ```text
/// max_i |a_i - b_i| / max(1e-8, |a_i| + |b_i|)
/// ```
///
/// The floor in the denominator keeps elements where both gradients are
/// zero from reporting spurious error.
pub fn rel_error(a: &Tensor, b: &Tensor) -> f64 {
    assert_eq!(a.shape, b.shape, "rel_error requires matching shapes");
    a.data
        .iter()
        .zip(&b.data)
        .map(|(&x, &y)| (x - y).abs() / (x.abs() + y.abs()).max(1e-8))
        .fold(0.0, f64::max)
}

/// Centered-difference gradient of a scalar-valued function
///
/// Evaluates `f` twice per element of `x`. Suitable for loss functions.
pub fn numerical_gradient<F>(f: F, x: &Tensor, h: f64) -> Tensor
where
    F: Fn(&Tensor) -> f64,
{
    let mut grad = Tensor::zeros(x.shape.clone());
    let mut probe = x.clone();

    for i in 0..x.data.len() {
        let orig = probe.data[i];

        probe.data[i] = orig + h;
        let pos = f(&probe);
        probe.data[i] = orig - h;
        let neg = f(&probe);
        probe.data[i] = orig;

        grad.data[i] = (pos - neg) / (2.0 * h);
    }

    grad
}

/// Centered-difference gradient of a tensor-valued function, contracted
/// against an upstream gradient
///
/// For a forward pass `y = f(x)` and upstream gradient `dout`, this
/// computes the gradient of the scalar `sum(f(x) * dout)` with respect
/// to `x`, which is exactly what the paired backward pass returns for
/// that `dout`.
pub fn numerical_gradient_tensor<F>(f: F, x: &Tensor, dout: &Tensor, h: f64) -> Tensor
where
    F: Fn(&Tensor) -> Tensor,
{
    numerical_gradient(
        |probe| {
            let y = f(probe);
            y.data.iter().zip(&dout.data).map(|(a, b)| a * b).sum()
        },
        x,
        h,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_gradient_of_quadratic() {
        // f(x) = sum(x²) has gradient 2x
        let x = Tensor::randn(vec![3, 4], 0.0, 1.0, 100);
        let grad = numerical_gradient(|v| v.data.iter().map(|&e| e * e).sum(), &x, 1e-5);
        let expected = x.mul_scalar(2.0);
        assert!(rel_error(&grad, &expected) < 1e-8);
    }

    #[test]
    fn test_tensor_gradient_of_identity() {
        // For f(x) = x, the contracted gradient is the upstream gradient
        let x = Tensor::randn(vec![2, 5], 0.0, 1.0, 101);
        let dout = Tensor::randn(vec![2, 5], 0.0, 1.0, 102);
        let grad = numerical_gradient_tensor(|v| v.clone(), &x, &dout, 1e-5);
        assert!(rel_error(&grad, &dout) < 1e-8);
    }

    #[test]
    fn test_rel_error_zero_for_identical() {
        let a = Tensor::randn(vec![4], 0.0, 1.0, 103);
        assert_eq!(rel_error(&a, &a.clone()), 0.0);
    }
}
