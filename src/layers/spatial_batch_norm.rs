//! Spatial Batch Normalization
//!
//! Batch normalization for convolutional feature maps of shape
//! `(N, C, H, W)`. Each channel is normalized with one mean and one
//! variance computed over the batch *and* both spatial axes, with one
//! `gamma`/`beta` pair per channel.
//!
//! Moving the channel axis into the feature position reduces this layer
//! to ordinary batch normalization: a `(N, C, H, W)` tensor regrouped as
//! `(N*H*W, C)` has exactly the per-channel reduction the spatial variant
//! needs, so forward and backward both delegate to [`BatchNorm`] and then
//! restore the layout. Running statistics behave as in [`BatchNorm`],
//! with `C` entries.

use crate::error::{LayerError, Result};
use crate::layers::batch_norm::{BatchNorm, BatchNormCache, BatchNormState};
use crate::tensor::Tensor;

/// Spatial batch normalization layer
///
/// Owns a [`BatchNorm`] whose feature dimension is the channel count.
pub struct SpatialBatchNorm {
    pub inner: BatchNorm,
}

impl SpatialBatchNorm {
    /// Create a new layer with per-channel gamma = 1 and beta = 0
    pub fn new(channels: usize) -> Self {
        Self {
            inner: BatchNorm::new(channels),
        }
    }

    /// Build a layer from existing per-channel scale/shift parameters
    pub fn from_parts(gamma: Tensor, beta: Tensor) -> Self {
        Self {
            inner: BatchNorm::from_parts(gamma, beta),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input of shape `[batch, channels, height, width]`
    /// * `state` - Caller-owned statistics block of width `channels`
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `x` is not 4-D or its channel count does not
    /// match the layer parameters or the state.
    pub fn forward(
        &self,
        x: &Tensor,
        state: &mut BatchNormState,
    ) -> Result<(Tensor, SpatialBatchNormCache)> {
        if x.shape.len() != 4 {
            return Err(LayerError::ShapeMismatch {
                op: "spatial_batchnorm_forward",
                expected: "(N, C, H, W)".to_string(),
                actual: format!("{:?}", x.shape),
            });
        }
        let channels = self.inner.gamma.data.len();
        if x.shape[1] != channels {
            return Err(LayerError::ShapeMismatch {
                op: "spatial_batchnorm_forward",
                expected: format!("{} channels", channels),
                actual: format!("{} (input shape {:?})", x.shape[1], x.shape),
            });
        }
        let dims = [x.shape[0], x.shape[1], x.shape[2], x.shape[3]];

        let grouped = channels_last(x);
        let (out_grouped, inner_cache) = self.inner.forward(&grouped, state)?;
        let out = channels_second(&out_grouped, dims);

        Ok((out, SpatialBatchNormCache { inner: inner_cache, dims }))
    }

    /// Backward pass
    ///
    /// Expects a cache from a training-mode forward, like [`BatchNorm`].
    pub fn backward(
        &self,
        grad_out: &Tensor,
        cache: &SpatialBatchNormCache,
    ) -> SpatialBatchNormGradients {
        let grouped = channels_last(grad_out);
        let inner_grads = self.inner.backward(&grouped, &cache.inner);

        SpatialBatchNormGradients {
            gamma: inner_grads.gamma,
            beta: inner_grads.beta,
            x: channels_second(&inner_grads.x, cache.dims),
        }
    }
}

/// Regroup `(N, C, H, W)` as `(N*H*W, C)` so the channel axis becomes the
/// feature axis
fn channels_last(x: &Tensor) -> Tensor {
    let (n, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    let mut data = vec![0.0; n * c * h * w];
    for idx_n in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let src = idx_n * x.strides[0]
                        + ci * x.strides[1]
                        + hi * x.strides[2]
                        + wi * x.strides[3];
                    let dst = ((idx_n * h + hi) * w + wi) * c + ci;
                    data[dst] = x.data[src];
                }
            }
        }
    }
    Tensor::new(data, vec![n * h * w, c])
}

/// Inverse of [`channels_last`]: restore `(N*H*W, C)` rows to
/// `(N, C, H, W)`
fn channels_second(x: &Tensor, dims: [usize; 4]) -> Tensor {
    let [n, c, h, w] = dims;
    let mut out = Tensor::zeros(vec![n, c, h, w]);
    for idx_n in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let src = ((idx_n * h + hi) * w + wi) * c + ci;
                    let dst = idx_n * out.strides[0]
                        + ci * out.strides[1]
                        + hi * out.strides[2]
                        + wi * out.strides[3];
                    out.data[dst] = x.data[src];
                }
            }
        }
    }
    out
}

/// Cache for the spatial batch normalization backward pass
#[derive(Debug)]
pub struct SpatialBatchNormCache {
    inner: BatchNormCache,
    dims: [usize; 4],
}

/// Gradients for spatial batch normalization
pub struct SpatialBatchNormGradients {
    pub gamma: Tensor,
    pub beta: Tensor,
    /// Gradient to pass to the previous layer
    pub x: Tensor,
}
