//! Inverted Dropout
//!
//! Dropout regularizes a network by zeroing random activations during
//! training. This is the *inverted* variant: survivors are scaled up by
//! `1/p` at training time so the expected activation matches the
//! unmodified input, and inference needs no compensation at all.
//!
//! ```text
//! train: out = x * mask / p      mask ~ Bernoulli(p), p = keep probability
//! test:  out = x
//! ```
//!
//! Note that `p` is the probability of **keeping** an activation, not of
//! dropping it.
//!
//! An optional seed makes the mask deterministic, which gradient checking
//! needs; real training leaves it unset.

use crate::layers::Mode;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Inverted dropout layer
pub struct Dropout {
    /// Probability of keeping each activation, in `(0, 1]`
    pub p: f64,
    pub mode: Mode,
    /// Fixed seed for a reproducible mask; `None` draws a fresh mask per
    /// call
    pub seed: Option<u64>,
}

impl Dropout {
    /// Create a new dropout layer
    ///
    /// # Panics
    ///
    /// Panics unless `0 < p <= 1`; a keep probability of zero would
    /// divide every survivor by zero.
    pub fn new(p: f64, mode: Mode, seed: Option<u64>) -> Self {
        assert!(
            p > 0.0 && p <= 1.0,
            "keep probability must be in (0, 1], got {}",
            p
        );
        Self { p, mode, seed }
    }

    /// Forward pass
    ///
    /// In training mode, draws a keep-mask, scales survivors by `1/p`,
    /// and caches the mask. In test mode, returns the input unchanged
    /// and caches no mask.
    pub fn forward(&self, x: &Tensor) -> (Tensor, DropoutCache) {
        match self.mode {
            Mode::Test => (
                x.clone(),
                DropoutCache {
                    mask: None,
                    scale: 1.0,
                },
            ),
            Mode::Train => {
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };

                let scale = 1.0 / self.p;
                let mut mask = Vec::with_capacity(x.data.len());
                let mut output = Tensor::zeros(x.shape.clone());

                for i in 0..x.data.len() {
                    let keep = rng.gen::<f64>() < self.p;
                    mask.push(keep);
                    if keep {
                        output.data[i] = x.data[i] * scale;
                    }
                }

                (
                    output,
                    DropoutCache {
                        mask: Some(mask),
                        scale,
                    },
                )
            }
        }
    }

    /// Backward pass
    ///
    /// Replays the cached mask on the upstream gradient in training
    /// mode; passes the gradient through unchanged in test mode.
    pub fn backward(&self, grad_out: &Tensor, cache: &DropoutCache) -> Tensor {
        if let Some(mask) = &cache.mask {
            let mut grad_input = Tensor::zeros(grad_out.shape.clone());
            for (i, &keep) in mask.iter().enumerate() {
                if keep {
                    grad_input.data[i] = grad_out.data[i] * cache.scale;
                }
                // else: gradient is zero (value was dropped)
            }
            grad_input
        } else {
            grad_out.clone()
        }
    }
}

/// Cache for the dropout backward pass
pub struct DropoutCache {
    /// Keep-mask (true = kept, false = dropped); `None` when the forward
    /// pass ran in test mode
    pub mask: Option<Vec<bool>>,
    /// Scaling factor applied to kept values (`1/p`)
    pub scale: f64,
}
