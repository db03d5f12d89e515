//! Loss Functions
//!
//! The two terminal objectives of a classification network. Both consume
//! raw scores of shape `(N, C)` and integer labels, and return the scalar
//! loss together with its gradient with respect to the scores, so they
//! plug directly into the layer backward chain.
//!
//! - [`svm_loss`]: multiclass hinge. Every class scoring within a margin
//!   of 1 of the correct class contributes; the gradient counts the
//!   violations.
//! - [`softmax_loss`]: cross-entropy over a softmax. Scores are shifted
//!   by the per-example maximum before exponentiating so `exp` cannot
//!   overflow; the shift cancels in the normalized probabilities.
//!
//! Both validate the label vector eagerly: a length mismatch or an
//! out-of-range label fails before any computation.

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

fn validate_labels(op: &'static str, x: &Tensor, y: &[usize]) -> Result<(usize, usize)> {
    if x.shape.len() != 2 {
        return Err(LayerError::ShapeMismatch {
            op,
            expected: "(batch, classes)".to_string(),
            actual: format!("{:?}", x.shape),
        });
    }
    let (n, c) = (x.shape[0], x.shape[1]);
    if y.len() != n {
        return Err(LayerError::ShapeMismatch {
            op,
            expected: format!("{} labels (one per example)", n),
            actual: format!("{}", y.len()),
        });
    }
    for (index, &label) in y.iter().enumerate() {
        if label >= c {
            return Err(LayerError::LabelOutOfRange {
                op,
                index,
                label,
                classes: c,
            });
        }
    }
    Ok((n, c))
}

/// Multiclass SVM (hinge) loss
///
/// For scores `x` and labels `y`, the margin of class `j` on example `i`
/// is `max(0, x[i,j] - x[i,y[i]] + 1)`, with the correct class's own
/// margin forced to zero. The loss is the mean total margin over the
/// batch.
///
/// # Returns
///
/// `(loss, dx)` where `dx[i,j] = 1/N` for each violating class and the
/// correct class accumulates `-violations/N`.
pub fn svm_loss(x: &Tensor, y: &[usize]) -> Result<(f64, Tensor)> {
    let (n, c) = validate_labels("svm_loss", x, y)?;

    let mut loss = 0.0;
    let mut dx = Tensor::zeros(x.shape.clone());
    for (i, &label) in y.iter().enumerate() {
        let correct = x.data[i * c + label];
        let mut violations = 0usize;
        for j in 0..c {
            if j == label {
                continue;
            }
            let margin = x.data[i * c + j] - correct + 1.0;
            if margin > 0.0 {
                loss += margin;
                dx.data[i * c + j] = 1.0;
                violations += 1;
            }
        }
        dx.data[i * c + label] = -(violations as f64);
    }

    let inv_n = 1.0 / n as f64;
    Ok((loss * inv_n, dx.mul_scalar(inv_n)))
}

/// Softmax cross-entropy loss
///
/// The loss is the mean negative log-probability of the true class under
/// a softmax over the scores.
///
/// # Returns
///
/// `(loss, dx)` with `dx = (softmax(x) - one_hot(y)) / N`.
pub fn softmax_loss(x: &Tensor, y: &[usize]) -> Result<(f64, Tensor)> {
    let (n, c) = validate_labels("softmax_loss", x, y)?;

    let mut loss = 0.0;
    let mut dx = Tensor::zeros(x.shape.clone());
    for (i, &label) in y.iter().enumerate() {
        let row = &x.data[i * c..(i + 1) * c];

        // Shift by the row maximum before exponentiating
        let max = row.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let exp_sum: f64 = row.iter().map(|&v| (v - max).exp()).sum();

        let log_prob = (row[label] - max) - exp_sum.ln();
        loss -= log_prob;

        for j in 0..c {
            let prob = (row[j] - max).exp() / exp_sum;
            dx.data[i * c + j] = if j == label { prob - 1.0 } else { prob };
        }
    }

    let inv_n = 1.0 / n as f64;
    Ok((loss * inv_n, dx.mul_scalar(inv_n)))
}
