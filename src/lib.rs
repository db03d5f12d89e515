//! Strata: Neural-Network Layer Primitives
//!
//! A library of stateless layer building blocks for feed-forward and
//! convolutional networks, each exposing a matched forward (inference)
//! and backward (gradient) pass. There is no computation graph: every
//! forward call returns an explicit, layer-specific cache that the
//! caller hands to the paired backward call, and every backward pass is
//! a hand-derived closed form verified by numerical gradient checking.
//!
//! # Modules
//!
//! - [`tensor`] - Flat `f64` tensor with the operations the layers need
//! - [`layers`] - Affine, ReLU, normalization, dropout, convolution, pooling
//! - [`losses`] - Multiclass SVM and softmax cross-entropy objectives
//! - [`im2col`] - Patch transform behind convolution and pooling
//! - [`gradcheck`] - Centered-difference gradient checking helpers
//! - [`error`] - Typed contract violations
//!
//! # Example
//!
//! ```rust
//! use strata::{Affine, relu_forward, relu_backward, softmax_loss, Tensor};
//!
//! // A one-layer classifier step: forward, loss, backward
//! let x = Tensor::randn(vec![4, 10], 0.0, 1.0, 0);
//! let labels = [0, 2, 1, 2];
//! let layer = Affine::new(10, 3, 1);
//!
//! let (hidden, affine_cache) = layer.forward(&x).unwrap();
//! let (scores, relu_cache) = relu_forward(&hidden);
//! let (loss, dscores) = softmax_loss(&scores, &labels).unwrap();
//!
//! let dhidden = relu_backward(&dscores, &relu_cache);
//! let grads = layer.backward(&dhidden, &affine_cache);
//! assert_eq!(grads.weight.shape, layer.weight.shape);
//! assert!(loss > 0.0);
//! ```
//!
//! Layer calls run to completion on the calling thread; the only side
//! effect anywhere is the running-statistics update a training-mode
//! batch normalization forward applies to its caller-owned state block.

pub mod error;
pub mod gradcheck;
pub mod im2col;
pub mod layers;
pub mod losses;
pub mod tensor;

// Re-export main types for convenience
pub use error::{LayerError, Result};
pub use im2col::{col2im, conv_output_size, im2col};
pub use layers::{
    relu_backward, relu_forward, Affine, BatchNorm, BatchNormState, Conv2d, Dropout, LayerNorm,
    MaxPool2d, Mode, SpatialBatchNorm,
};
pub use losses::{softmax_loss, svm_loss};
pub use tensor::Tensor;
