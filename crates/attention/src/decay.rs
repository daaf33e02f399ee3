//! Exponential decay kernels derived from smoothing coefficients.
//!
//! For a coefficient `alpha` in `(0, 1)` and a length `n`, with `k = 0..n`:
//!
//! * smoothing: `alpha * (1 - alpha)^(n - 1 - k)`, newest step weighted `alpha`,
//! * growth: `(1 - alpha)^(n - 1 - k)`,
//! * initial state: `(1 - alpha)^(k + 1)`.
//!
//! Every function maps `alpha` of shape `[...]` to `[..., n]` and stays
//! differentiable in `alpha`. Powers go through `exp(p * ln(1 - alpha))` with
//! the base clamped away from zero, so `alpha -> 1` yields zeros instead of NaN.

use candle_core::{Result, Tensor};

/// `sigmoid(logits)`, the coefficient every decay kernel takes.
pub fn alpha_from_logits(logits: &Tensor) -> Result<Tensor> {
    candle_nn::ops::sigmoid(logits)
}

fn decay_powers(alpha: &Tensor, powers: Vec<f32>) -> Result<Tensor> {
    let n = powers.len();
    let powers = Tensor::from_vec(powers, n, alpha.device())?.to_dtype(alpha.dtype())?;
    let log_base = alpha
        .affine(-1.0, 1.0)?
        .clamp(f32::MIN_POSITIVE, 1.0f32)?
        .log()?
        .unsqueeze(alpha.rank())?;
    log_base.broadcast_mul(&powers)?.exp()
}

fn reversed(n: usize) -> Vec<f32> {
    (0..n).rev().map(|p| p as f32).collect()
}

/// `(1 - alpha)^(n - 1 - k)`
pub fn growth_weights(alpha: &Tensor, n: usize) -> Result<Tensor> {
    decay_powers(alpha, reversed(n))
}

/// `alpha * (1 - alpha)^(n - 1 - k)`
pub fn smoothing_weights(alpha: &Tensor, n: usize) -> Result<Tensor> {
    growth_weights(alpha, n)?.broadcast_mul(&alpha.unsqueeze(alpha.rank())?)
}

/// `(1 - alpha)^(k + 1)`
pub fn initial_state_weights(alpha: &Tensor, n: usize) -> Result<Tensor> {
    decay_powers(alpha, (1..=n).map(|p| p as f32).collect())
}
