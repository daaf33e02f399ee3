//! Exponential smoothing and frequency attention for ETSformer.
//!
//! Series tensors follow the layout `[batch, time, channels]` (or, inside
//! MHESA, `[batch, heads, time, dim_head]`). Operators never mutate their
//! parameters; learnable tensors live in a [`layers::ParamStore`].
//!
//! * [`conv`] provides the causal convolution behind exponential smoothing,
//!   with an FFT implementation and a quadratic reference that agree within
//!   floating tolerance.
//! * [`mhesa`] is multi-head exponential smoothing attention.
//! * [`frequency`] is the top-K spectral filter that extracts seasonality.
//!
//! Spectral work runs on host `f32` buffers, so these operators require CPU
//! tensors; other devices report [`AttentionError::UnsupportedDevice`].

pub mod conv;
pub mod core;
pub mod decay;
pub mod frequency;
pub mod masks;
pub mod mhesa;
mod spectral;

pub use crate::conv::{conv1d_fft, convolver, FftConvolver, NaiveConvolver};
pub use crate::core::{
    AttentionError, CausalConvolver, ConvolutionStrategy, FrequencyConfig, MhesaConfig,
};
pub use crate::frequency::FrequencyAttention;
pub use crate::mhesa::{MhesaParams, MultiHeadEsAttention};
pub use crate::spectral::next_fast_len;
