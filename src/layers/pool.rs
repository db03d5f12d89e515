//! Max-Pooling Layer
//!
//! Spatial downsampling that keeps the largest activation in each
//! pooling window. Every channel is pooled independently: the input is
//! regrouped to `(N*C, 1, H, W)` so the patch transform extracts
//! single-channel windows, the arg-max row of each column is recorded,
//! and the winners are reassembled into `(N, C, H', W')`.
//!
//! The backward pass is the subgradient of `max`: each window's upstream
//! gradient flows entirely to the element that won the forward pass, and
//! the rest of the window receives zero. Scattering into a zeroed column
//! matrix at the recorded arg-max rows and folding back with `col2im`
//! implements exactly that routing.

use crate::error::{LayerError, Result};
use crate::im2col::{col2im, conv_output_size, im2col};
use crate::tensor::Tensor;

/// Max-pooling layer
pub struct MaxPool2d {
    pub pool_height: usize,
    pub pool_width: usize,
    pub stride: usize,
}

impl MaxPool2d {
    pub fn new(pool_height: usize, pool_width: usize, stride: usize) -> Self {
        Self {
            pool_height,
            pool_width,
            stride,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input of shape `[batch, channels, height, width]`
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `x` is not 4-D; `NonIntegralOutput` if the
    /// pooling window does not tile the input at the given stride.
    pub fn forward(&self, x: &Tensor) -> Result<(Tensor, MaxPool2dCache)> {
        if x.shape.len() != 4 {
            return Err(LayerError::ShapeMismatch {
                op: "max_pool_forward",
                expected: "(N, C, H, W)".to_string(),
                actual: format!("{:?}", x.shape),
            });
        }
        let (n, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
        let h_out = conv_output_size("max_pool_forward", h, self.pool_height, 0, self.stride)?;
        let w_out = conv_output_size("max_pool_forward", w, self.pool_width, 0, self.stride)?;

        // Each channel pools on its own
        let grouped = x.reshape(&[n * c, 1, h, w]);
        let cols = im2col(&grouped, self.pool_height, self.pool_width, 0, self.stride)?;
        let rows = cols.shape[0];
        let n_cols = cols.shape[1];

        let positions = h_out * w_out;
        let mut argmax = vec![0usize; n_cols];
        let mut out = Tensor::zeros(vec![n, c, h_out, w_out]);
        for col in 0..n_cols {
            let mut best_row = 0;
            let mut best = cols.data[col];
            for row in 1..rows {
                let val = cols.data[row * n_cols + col];
                if val > best {
                    best = val;
                    best_row = row;
                }
            }
            argmax[col] = best_row;

            // Column index is position * (N*C) + group; the output stores
            // the winner at (group, position)
            let group = col % (n * c);
            let pos = col / (n * c);
            out.data[group * positions + pos] = best;
        }

        let cache = MaxPool2dCache {
            x_dims: [n, c, h, w],
            cols_rows: rows,
            argmax,
        };
        Ok((out, cache))
    }

    /// Backward pass
    ///
    /// Routes each window's upstream gradient to the element that won the
    /// forward pass.
    pub fn backward(&self, grad_out: &Tensor, cache: &MaxPool2dCache) -> Tensor {
        let [n, c, h, w] = cache.x_dims;
        let positions = grad_out.shape[2] * grad_out.shape[3];
        let n_cols = cache.argmax.len();

        let mut dcols = Tensor::zeros(vec![cache.cols_rows, n_cols]);
        for (col, &row) in cache.argmax.iter().enumerate() {
            let group = col % (n * c);
            let pos = col / (n * c);
            dcols.data[row * n_cols + col] = grad_out.data[group * positions + pos];
        }

        let grad_grouped = col2im(
            &dcols,
            n * c,
            1,
            h,
            w,
            self.pool_height,
            self.pool_width,
            0,
            self.stride,
        );
        grad_grouped.reshape(&[n, c, h, w])
    }
}

/// Cache for the max-pooling backward pass
///
/// Records the winning row of every patch column along with the column
/// matrix geometry needed to rebuild it.
#[derive(Debug)]
pub struct MaxPool2dCache {
    x_dims: [usize; 4],
    cols_rows: usize,
    /// Winning row per patch column
    pub argmax: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradcheck::{numerical_gradient_tensor, rel_error};

    #[test]
    fn test_forward_known_values() {
        let x = Tensor::new(
            vec![
                1.0, 2.0, 5.0, 6.0, //
                3.0, 4.0, 7.0, 8.0, //
                9.0, 10.0, 13.0, 14.0, //
                11.0, 12.0, 15.0, 16.0,
            ],
            vec![1, 1, 4, 4],
        );
        let layer = MaxPool2d::new(2, 2, 2);
        let (out, _) = layer.forward(&x).unwrap();
        assert_eq!(out.shape, vec![1, 1, 2, 2]);
        assert_eq!(out.data, vec![4.0, 8.0, 12.0, 16.0]);
    }

    #[test]
    fn test_channels_pool_independently() {
        let x = Tensor::new(
            vec![
                // channel 0
                1.0, 2.0, 3.0, 4.0, //
                // channel 1
                40.0, 30.0, 20.0, 10.0,
            ],
            vec![1, 2, 2, 2],
        );
        let layer = MaxPool2d::new(2, 2, 2);
        let (out, _) = layer.forward(&x).unwrap();
        assert_eq!(out.shape, vec![1, 2, 1, 1]);
        assert_eq!(out.data, vec![4.0, 40.0]);
    }

    #[test]
    fn test_backward_routes_gradient_to_window_max() {
        // One maximum per window at a known position: the entire upstream
        // gradient for that window lands there, everything else is zero.
        let x = Tensor::new(
            vec![
                1.0, 2.0, 5.0, 6.0, //
                3.0, 4.0, 7.0, 8.0, //
                9.0, 10.0, 13.0, 14.0, //
                11.0, 12.0, 15.0, 16.0,
            ],
            vec![1, 1, 4, 4],
        );
        let layer = MaxPool2d::new(2, 2, 2);
        let (_, cache) = layer.forward(&x).unwrap();

        let dout = Tensor::new(vec![10.0, 20.0, 30.0, 40.0], vec![1, 1, 2, 2]);
        let dx = layer.backward(&dout, &cache);

        let expected = vec![
            0.0, 0.0, 0.0, 0.0, //
            0.0, 10.0, 0.0, 20.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 30.0, 0.0, 40.0,
        ];
        assert_eq!(dx.data, expected);
    }

    #[test]
    fn test_rejects_ragged_geometry() {
        let x = Tensor::zeros(vec![1, 1, 5, 5]);
        let layer = MaxPool2d::new(2, 2, 2);
        let err = layer.forward(&x).unwrap_err();
        assert!(matches!(err, LayerError::NonIntegralOutput { .. }));
    }

    #[test]
    fn test_gradient_check() {
        let x = Tensor::randn(vec![2, 3, 4, 4], 0.0, 1.0, 80);
        let layer = MaxPool2d::new(2, 2, 2);

        let (out, cache) = layer.forward(&x).unwrap();
        assert_eq!(out.shape, vec![2, 3, 2, 2]);
        let dout = Tensor::randn(out.shape.clone(), 0.0, 1.0, 81);
        let dx = layer.backward(&dout, &cache);

        assert_eq!(dx.shape, x.shape);

        let dx_num = numerical_gradient_tensor(|v| layer.forward(v).unwrap().0, &x, &dout, 1e-5);
        assert!(rel_error(&dx, &dx_num) < 1e-7);
    }
}
