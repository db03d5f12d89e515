//! Patch Transform (im2col / col2im)
//!
//! Convolution and pooling both reduce to matrix multiplication once the
//! input is rearranged so that every receptive field becomes a column of a
//! 2-D matrix. This module provides that rearrangement and its exact
//! adjoint.
//!
//! ## Layout
//!
//! For an input of shape `(N, C, H, W)` with a `fh × fw` window, padding
//! `pad` and stride `stride`, the column matrix has shape
//!
//! ```text
//! (C * fh * fw,  H_out * W_out * N)
//! ```
//!
//! with `H_out = (H - fh + 2*pad)/stride + 1` (likewise `W_out`). The
//! column index is `position * N + n` where positions run row-major over
//! the output grid; the row index is `(c * fh + fi) * fw + fj`. The
//! convolution and pooling layers rely on this ordering when they reshape
//! a `(F, H_out * W_out * N)` product back into `(N, F, H_out, W_out)`.
//!
//! ## Adjoint, not inverse
//!
//! [`col2im`] **accumulates**: every column is summed back into the pixel
//! positions it was read from. When patches do not overlap
//! (`stride >= window`), `col2im(im2col(x)) == x` exactly; with overlap,
//! each pixel comes back multiplied by the number of patches that touch
//! it. That accumulation is what backpropagates a gradient through every
//! output pixel an input pixel influenced.

use crate::error::{LayerError, Result};
use crate::tensor::Tensor;

/// Number of window positions along one spatial extent
///
/// Errors if the window overruns the padded extent or the stride does not
/// land the final window flush against the edge.
pub fn conv_output_size(
    op: &'static str,
    extent: usize,
    window: usize,
    pad: usize,
    stride: usize,
) -> Result<usize> {
    let padded = extent + 2 * pad;
    if window > padded || (padded - window) % stride != 0 {
        return Err(LayerError::NonIntegralOutput {
            op,
            extent,
            window,
            pad,
            stride,
        });
    }
    Ok((padded - window) / stride + 1)
}

/// Rearrange every receptive field of a `(N, C, H, W)` tensor into a
/// column
///
/// The input is zero-padded by `pad` on each side of the spatial axes
/// before extraction; `x` itself is not modified.
pub fn im2col(x: &Tensor, fh: usize, fw: usize, pad: usize, stride: usize) -> Result<Tensor> {
    if x.shape.len() != 4 {
        return Err(LayerError::ShapeMismatch {
            op: "im2col",
            expected: "(N, C, H, W)".to_string(),
            actual: format!("{:?}", x.shape),
        });
    }
    let (n, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    let h_out = conv_output_size("im2col", h, fh, pad, stride)?;
    let w_out = conv_output_size("im2col", w, fw, pad, stride)?;

    let rows = c * fh * fw;
    let n_cols = h_out * w_out * n;
    let mut cols = vec![0.0; rows * n_cols];

    for idx_n in 0..n {
        for ci in 0..c {
            for i in 0..h_out {
                for j in 0..w_out {
                    let col = (i * w_out + j) * n + idx_n;
                    for fi in 0..fh {
                        // Coordinates in the padded image, shifted back into
                        // the unpadded input; out-of-range reads are zeros.
                        let src_h = (i * stride + fi) as isize - pad as isize;
                        for fj in 0..fw {
                            let src_w = (j * stride + fj) as isize - pad as isize;
                            let row = (ci * fh + fi) * fw + fj;
                            let val = if src_h >= 0
                                && src_h < h as isize
                                && src_w >= 0
                                && src_w < w as isize
                            {
                                x.data[idx_n * x.strides[0]
                                    + ci * x.strides[1]
                                    + src_h as usize * x.strides[2]
                                    + src_w as usize * x.strides[3]]
                            } else {
                                0.0
                            };
                            cols[row * n_cols + col] = val;
                        }
                    }
                }
            }
        }
    }

    Ok(Tensor::new(cols, vec![rows, n_cols]))
}

/// Accumulate a column matrix back into a `(N, C, H, W)` tensor
///
/// Exact adjoint of [`im2col`] with the same window geometry: overlapping
/// patches sum their contributions, and the padded border is discarded.
///
/// # Panics
///
/// Panics if the column matrix shape does not match the given geometry.
/// `col2im` is only meaningful on a matrix produced by (or shaped like
/// the output of) an `im2col` call with identical arguments.
pub fn col2im(
    cols: &Tensor,
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    fh: usize,
    fw: usize,
    pad: usize,
    stride: usize,
) -> Tensor {
    let h_out = (h + 2 * pad - fh) / stride + 1;
    let w_out = (w + 2 * pad - fw) / stride + 1;
    let rows = c * fh * fw;
    let n_cols = h_out * w_out * n;
    assert_eq!(
        cols.shape,
        vec![rows, n_cols],
        "col2im: column matrix does not match geometry n={} c={} h={} w={} window={}x{} pad={} stride={}",
        n, c, h, w, fh, fw, pad, stride
    );

    let mut x = Tensor::zeros(vec![n, c, h, w]);

    for idx_n in 0..n {
        for ci in 0..c {
            for i in 0..h_out {
                for j in 0..w_out {
                    let col = (i * w_out + j) * n + idx_n;
                    for fi in 0..fh {
                        let src_h = (i * stride + fi) as isize - pad as isize;
                        for fj in 0..fw {
                            let src_w = (j * stride + fj) as isize - pad as isize;
                            if src_h < 0 || src_h >= h as isize || src_w < 0 || src_w >= w as isize
                            {
                                continue;
                            }
                            let row = (ci * fh + fi) * fw + fj;
                            x.data[idx_n * x.strides[0]
                                + ci * x.strides[1]
                                + src_h as usize * x.strides[2]
                                + src_w as usize * x.strides[3]] += cols.data[row * n_cols + col];
                        }
                    }
                }
            }
        }
    }

    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_size() {
        assert_eq!(conv_output_size("test", 4, 2, 0, 2).unwrap(), 2);
        assert_eq!(conv_output_size("test", 5, 3, 1, 2).unwrap(), 3);
        assert_eq!(conv_output_size("test", 3, 3, 0, 1).unwrap(), 1);
    }

    #[test]
    fn test_output_size_rejects_ragged_geometry() {
        // (4 - 3) is not divisible by the stride of 2
        let err = conv_output_size("test", 4, 3, 0, 2).unwrap_err();
        assert!(matches!(err, LayerError::NonIntegralOutput { .. }));

        // window larger than the padded extent
        let err = conv_output_size("test", 2, 5, 1, 1).unwrap_err();
        assert!(matches!(err, LayerError::NonIntegralOutput { .. }));
    }

    #[test]
    fn test_column_ordering_unit_window() {
        // A 1x1 window turns each pixel into its own column, in row-major
        // position order.
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 1, 2, 2]);
        let cols = im2col(&x, 1, 1, 0, 1).unwrap();
        assert_eq!(cols.shape, vec![1, 4]);
        assert_eq!(cols.data, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_padding_reads_zeros() {
        let x = Tensor::new(vec![7.0], vec![1, 1, 1, 1]);
        let cols = im2col(&x, 3, 3, 1, 1).unwrap();
        assert_eq!(cols.shape, vec![9, 1]);
        // Only the window center lands on the real pixel
        assert_eq!(cols.data[4], 7.0);
        assert_eq!(cols.data.iter().sum::<f64>(), 7.0);
    }

    #[test]
    fn test_batch_is_fastest_column_axis() {
        // Two single-pixel images: columns for the same position must be
        // adjacent, batch varying fastest.
        let x = Tensor::new(vec![1.0, 2.0], vec![2, 1, 1, 1]);
        let cols = im2col(&x, 1, 1, 0, 1).unwrap();
        assert_eq!(cols.shape, vec![1, 2]);
        assert_eq!(cols.data, vec![1.0, 2.0]);
    }

    #[test]
    fn test_round_trip_identity_without_overlap() {
        let x = Tensor::randn(vec![2, 3, 4, 4], 0.0, 1.0, 7);
        let cols = im2col(&x, 2, 2, 0, 2).unwrap();
        let back = col2im(&cols, 2, 3, 4, 4, 2, 2, 0, 2);
        assert_eq!(back.data, x.data);
    }

    #[test]
    fn test_round_trip_counts_overlap() {
        // 2x2 window at stride 1 over 3x3: corner pixels are read by one
        // patch, edges by two, the center by four.
        let x = Tensor::new(
            vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            vec![1, 1, 3, 3],
        );
        let cols = im2col(&x, 2, 2, 0, 1).unwrap();
        let back = col2im(&cols, 1, 1, 3, 3, 2, 2, 0, 1);
        let counts = [1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0];
        assert_eq!(back.data, counts);
    }
}
