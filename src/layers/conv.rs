//! Convolution Layer
//!
//! Strided 2-D convolution over `(N, C, H, W)` inputs with `(F, C, HH, WW)`
//! filters. Rather than sliding windows directly, the forward pass runs
//! the patch transform and turns the whole convolution into one matrix
//! multiplication:
//!
//! ```text
//! cols   = im2col(x)                    (C*HH*WW, H'*W'*N)
//! out    = weight_flat @ cols + bias    (F, H'*W'*N)
//! ```
//!
//! with `H' = (H - HH + 2*pad)/stride + 1` (likewise `W'`), then regroups
//! the product into `(N, F, H', W')`. The column matrix is kept in the
//! cache so the backward pass multiplies against it instead of extracting
//! the patches a second time. The input gradient goes the other way:
//! filters transposed against the upstream gradient give a gradient in
//! patch space, and `col2im` scatter-accumulates it back onto every input
//! pixel that the overlapping windows read.

use crate::error::{LayerError, Result};
use crate::im2col::{col2im, conv_output_size, im2col};
use crate::tensor::Tensor;

/// 2-D convolution layer
pub struct Conv2d {
    /// Filter bank, shape `[out_channels, in_channels, height, width]`
    pub weight: Tensor,
    /// Per-filter bias, shape `[out_channels]`
    pub bias: Tensor,
    pub stride: usize,
    pub pad: usize,
}

impl Conv2d {
    /// Create a new layer with Gaussian-initialized filters
    ///
    /// Filters are drawn with standard deviation `sqrt(2 / fan_in)` where
    /// `fan_in = in_channels * height * width`. Bias starts at zero.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        height: usize,
        width: usize,
        stride: usize,
        pad: usize,
        seed: u64,
    ) -> Self {
        let fan_in = (in_channels * height * width) as f64;
        let scale = (2.0 / fan_in).sqrt();
        Self {
            weight: Tensor::randn(
                vec![out_channels, in_channels, height, width],
                0.0,
                scale,
                seed,
            ),
            bias: Tensor::zeros(vec![out_channels]),
            stride,
            pad,
        }
    }

    /// Build a layer from existing parameters
    ///
    /// # Panics
    ///
    /// Panics if `weight` is not 4-D or `bias` length does not match the
    /// filter count.
    pub fn from_parts(weight: Tensor, bias: Tensor, stride: usize, pad: usize) -> Self {
        assert_eq!(weight.shape.len(), 4, "weight must be (F, C, HH, WW)");
        assert_eq!(
            bias.data.len(),
            weight.shape[0],
            "bias length must match filter count"
        );
        Self {
            weight,
            bias,
            stride,
            pad,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input of shape `[batch, in_channels, height, width]`
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `x` is not 4-D or its channel count differs
    /// from the filters'; `NonIntegralOutput` if the window geometry does
    /// not tile the padded input.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, Conv2dCache)> {
        if x.shape.len() != 4 {
            return Err(LayerError::ShapeMismatch {
                op: "conv_forward",
                expected: "(N, C, H, W)".to_string(),
                actual: format!("{:?}", x.shape),
            });
        }
        let (f, c, hh, ww) = (
            self.weight.shape[0],
            self.weight.shape[1],
            self.weight.shape[2],
            self.weight.shape[3],
        );
        if x.shape[1] != c {
            return Err(LayerError::ShapeMismatch {
                op: "conv_forward",
                expected: format!("{} input channels", c),
                actual: format!("{} (input shape {:?})", x.shape[1], x.shape),
            });
        }
        let (n, h, w) = (x.shape[0], x.shape[2], x.shape[3]);
        let h_out = conv_output_size("conv_forward", h, hh, self.pad, self.stride)?;
        let w_out = conv_output_size("conv_forward", w, ww, self.pad, self.stride)?;

        let cols = im2col(x, hh, ww, self.pad, self.stride)?;
        let w_col = self.weight.reshape(&[f, c * hh * ww]);
        let out_col = w_col.matmul(&cols); // (F, H'*W'*N)

        // Regroup columns into (N, F, H', W'), adding the bias per filter
        let n_cols = h_out * w_out * n;
        let mut out = Tensor::zeros(vec![n, f, h_out, w_out]);
        for idx_n in 0..n {
            for fi in 0..f {
                for i in 0..h_out {
                    for j in 0..w_out {
                        let col = (i * w_out + j) * n + idx_n;
                        out.data[idx_n * out.strides[0]
                            + fi * out.strides[1]
                            + i * out.strides[2]
                            + j * out.strides[3]] =
                            out_col.data[fi * n_cols + col] + self.bias.data[fi];
                    }
                }
            }
        }

        let cache = Conv2dCache {
            x_dims: [n, c, h, w],
            cols,
        };
        Ok((out, cache))
    }

    /// Backward pass
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Gradient from the next layer `[N, F, H', W']`
    /// * `cache` - Cached column matrix and input dimensions
    ///
    /// # Returns
    ///
    /// Gradients for weight, bias, and input.
    pub fn backward(&self, grad_out: &Tensor, cache: &Conv2dCache) -> Conv2dGradients {
        let [n, c, h, w] = cache.x_dims;
        let (f, hh, ww) = (
            self.weight.shape[0],
            self.weight.shape[2],
            self.weight.shape[3],
        );
        let (h_out, w_out) = (grad_out.shape[2], grad_out.shape[3]);
        let n_cols = h_out * w_out * n;

        // grad_b sums the upstream gradient over batch and space
        let mut grad_bias = vec![0.0; f];
        // Upstream gradient regrouped to match the column layout
        let mut dout_cols = vec![0.0; f * n_cols];
        for idx_n in 0..n {
            for fi in 0..f {
                for i in 0..h_out {
                    for j in 0..w_out {
                        let val = grad_out.data[idx_n * grad_out.strides[0]
                            + fi * grad_out.strides[1]
                            + i * grad_out.strides[2]
                            + j * grad_out.strides[3]];
                        grad_bias[fi] += val;
                        dout_cols[fi * n_cols + (i * w_out + j) * n + idx_n] = val;
                    }
                }
            }
        }
        let dout_cols = Tensor::new(dout_cols, vec![f, n_cols]);

        // grad_W = dout_cols @ cols^T, restored to filter layout
        let grad_weight = dout_cols
            .matmul(&cache.cols.transpose())
            .reshape(&self.weight.shape);

        // grad_x: filters against the upstream gradient give the gradient
        // in patch space; col2im folds the overlaps back together
        let w_col = self.weight.reshape(&[f, c * hh * ww]);
        let dx_cols = w_col.transpose().matmul(&dout_cols);
        let grad_x = col2im(&dx_cols, n, c, h, w, hh, ww, self.pad, self.stride);

        Conv2dGradients {
            weight: grad_weight,
            bias: Tensor::new(grad_bias, vec![f]),
            x: grad_x,
        }
    }
}

/// Cache for the convolution backward pass
///
/// Retains the column matrix from the forward pass so the backward pass
/// does not extract the patches again.
#[derive(Debug)]
pub struct Conv2dCache {
    x_dims: [usize; 4],
    cols: Tensor,
}

/// Gradients for the convolution layer
pub struct Conv2dGradients {
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
        let x = Tensor::new(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            vec![1, 1, 3, 3],
        );
        let weight = Tensor::new(vec![1.0; 4], vec![1, 1, 2, 2]);
        let bias = Tensor::new(vec![0.5], vec![1]);
        let layer = Conv2d::from_parts(weight, bias, 1, 0);

        let (out, _) = layer.forward(&x).unwrap();
        assert_eq!(out.shape, vec![1, 1, 2, 2]);
        // Each output is the sum of its 2x2 window plus the bias
        assert_eq!(out.data, vec![12.5, 16.5, 24.5, 28.5]);
    }

    #[test]
    fn test_output_shape_with_padding_and_stride() {
        let x = Tensor::randn(vec![2, 3, 5, 5], 0.0, 1.0, 70);
        let layer = Conv2d::new(3, 4, 3, 3, 2, 1, 71);
        let (out, _) = layer.forward(&x).unwrap();
        // H' = (5 - 3 + 2*1)/2 + 1 = 3
        assert_eq!(out.shape, vec![2, 4, 3, 3]);
    }

    #[test]
    fn test_rejects_channel_mismatch() {
        let x = Tensor::zeros(vec![1, 2, 4, 4]);
        let layer = Conv2d::new(3, 1, 2, 2, 1, 0, 72);
        let err = layer.forward(&x).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rejects_ragged_geometry() {
        let x = Tensor::zeros(vec![1, 1, 4, 4]);
        let layer = Conv2d::new(1, 1, 3, 3, 2, 0, 73);
        let err = layer.forward(&x).unwrap_err();
        assert!(matches!(err, LayerError::NonIntegralOutput { .. }));
    }

    #[test]
    fn test_gradient_check() {
        let x = Tensor::randn(vec![2, 2, 4, 4], 0.0, 1.0, 74);
        let weight = Tensor::randn(vec![3, 2, 2, 2], 0.0, 0.5, 75);
        let bias = Tensor::randn(vec![3], 0.0, 0.5, 76);
        let layer = Conv2d::from_parts(weight.clone(), bias.clone(), 2, 1);

        let (out, cache) = layer.forward(&x).unwrap();
        assert_eq!(out.shape, vec![2, 3, 3, 3]);
        let dout = Tensor::randn(out.shape.clone(), 0.0, 1.0, 77);
        let grads = layer.backward(&dout, &cache);

        assert_eq!(grads.x.shape, x.shape);
        assert_eq!(grads.weight.shape, weight.shape);

        let dx_num = numerical_gradient_tensor(|v| layer.forward(v).unwrap().0, &x, &dout, 1e-5);
        assert!(rel_error(&grads.x, &dx_num) < 1e-7);

        let dw_num = numerical_gradient_tensor(
            |w| {
                let probe = Conv2d::from_parts(w.clone(), bias.clone(), 2, 1);
                probe.forward(&x).unwrap().0
            },
            &weight,
            &dout,
            1e-5,
        );
        assert!(rel_error(&grads.weight, &dw_num) < 1e-7);

        let db_num = numerical_gradient_tensor(
            |b| {
                let probe = Conv2d::from_parts(weight.clone(), b.clone(), 2, 1);
                probe.forward(&x).unwrap().0
            },
            &bias,
            &dout,
            1e-5,
        );
        assert!(rel_error(&grads.bias, &db_num) < 1e-7);
    }
}
