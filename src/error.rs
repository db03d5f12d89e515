//! Error Types
//!
//! Every layer forward pass and loss function validates its inputs before
//! touching any data. A failing call performs no partial computation and
//! leaves caller-owned state (such as running statistics) untouched.
//!
//! Tensor primitives themselves (`matmul`, `reshape`, ...) treat shape
//! violations as programmer errors and panic; the typed errors here cover
//! the contracts a caller assembling a network can get wrong at runtime:
//! mismatched feature dimensions, bad label vectors, and convolution or
//! pooling geometry that does not tile the input.

use thiserror::Error;

/// A contract violation detected at the start of a layer or loss call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// A tensor's rank or dimensions violate the documented contract of
    /// the named operation.
    #[error("{op}: shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        op: &'static str,
        expected: String,
        actual: String,
    },

    /// A classification label lies outside `[0, classes)`.
    #[error("{op}: label {label} at example {index} out of range for {classes} classes")]
    LabelOutOfRange {
        op: &'static str,
        index: usize,
        label: usize,
        classes: usize,
    },

    /// A convolution or pooling window does not tile the (padded) input
    /// extent evenly at the given stride.
    #[error(
        "{op}: window {window} with pad {pad} and stride {stride} \
         does not produce an integral output size over extent {extent}"
    )]
    NonIntegralOutput {
        op: &'static str,
        extent: usize,
        window: usize,
        pad: usize,
        stride: usize,
    },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LayerError>;
