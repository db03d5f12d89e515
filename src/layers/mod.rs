//! Neural Network Layers
//!
//! This module contains the layer primitives of the library. Each layer
//! provides a matched forward and backward pass.
//!
//! ## Layers
//!
//! - **affine**: Fully connected layer
//! - **activation**: ReLU activation (forward and backward)
//! - **batch_norm**: Batch normalization with caller-owned running statistics
//! - **layer_norm**: Per-example layer normalization
//! - **spatial_batch_norm**: Per-channel batch normalization over `(N, C, H, W)`
//! - **dropout**: Inverted dropout regularization
//! - **conv**: Strided convolution via the patch transform
//! - **pool**: Max-pooling via the patch transform
//!
//! ## Design Pattern
//!
//! Each parameterized layer follows a consistent pattern:
//!
//! ```rust,ignore
//! pub struct Layer {
//!     // Parameters (weights, biases, etc.)
//! }
//!
//! impl Layer {
//!     pub fn new(...) -> Self { }
//!     pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Cache)> { }
//!     pub fn backward(&self, grad: &Tensor, cache: &Cache) -> Gradients { }
//! }
//!
//! pub struct Cache {
//!     // Values needed for backward pass
//! }
//!
//! pub struct Gradients {
//!     // Gradients for parameters and input, in forward-input order
//! }
//! ```
//!
//! A cache is consumed by the backward pass of the layer that produced
//! it. Handing a cache to a different layer instance's backward is a
//! caller error the library does not detect at runtime; the per-layer
//! cache types make it hard to do across layer kinds.

pub mod activation;
pub mod affine;
pub mod batch_norm;
pub mod conv;
pub mod dropout;
pub mod layer_norm;
pub mod pool;
pub mod spatial_batch_norm;

// Re-export main types for convenience
pub use activation::{relu_backward, relu_forward};
pub use affine::{Affine, AffineCache, AffineGradients};
pub use batch_norm::{BatchNorm, BatchNormCache, BatchNormGradients, BatchNormState};
pub use conv::{Conv2d, Conv2dCache, Conv2dGradients};
pub use dropout::{Dropout, DropoutCache};
pub use layer_norm::{LayerNorm, LayerNormCache, LayerNormGradients};
pub use pool::{MaxPool2d, MaxPool2dCache};
pub use spatial_batch_norm::{
    SpatialBatchNorm, SpatialBatchNormCache, SpatialBatchNormGradients,
};

/// Execution mode for layers whose behavior differs between training and
/// inference (normalization running statistics, dropout masking).
///
/// Matching on this enum is exhaustive, so there is no invalid-mode
/// failure path at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Use batch statistics / draw dropout masks; may update caller state
    Train,
    /// Use stored statistics / pass activations through unchanged
    Test,
}
