//! Core traits and types shared across the operators.
//!
//! Series tensors use the layout `[..., time, channels]`: convolutions and
//! spectral filters run along dim `-2` independently for every leading index
//! and channel. Kernels are `[..., time]` and broadcast right-aligned against
//! the leading dims of the series.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{ConvolutionStrategy, FrequencyConfig, MhesaConfig, DEFAULT_NAIVE_MAX_SEQ_LEN};
pub use errors::AttentionError;

/// Causal convolution of a series with a per-lag weight kernel.
///
/// * `signal` is `[..., N, C]`; `kernel` is `[..., M]` with `M <= N`.
/// * `out[t] = sum_{s <= t} kernel[N - 1 - (t - s)] * signal[s]`, so the last
///   kernel entry weights the current step. Kernels shorter than `N` are
///   zero-extended at the tail.
/// * The output mirrors the shape and dtype of `signal`.
pub trait CausalConvolver: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    fn convolve(&self, signal: &Tensor, kernel: &Tensor) -> Result<Tensor, AttentionError>;

    /// Toggles train-only behaviour such as weight dropout.
    fn set_training(&self, _training: bool) {}
}
