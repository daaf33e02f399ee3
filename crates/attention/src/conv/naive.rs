//! Quadratic reference convolution.
//!
//! The kernel is gathered into a `[..., N, N]` lag matrix with
//! [`lag_index`](crate::masks::lag_index), optionally passed through dropout,
//! masked to the lower triangle and multiplied with the signal. Memory grows
//! with `N^2` per kernel row, so sequences beyond `max_seq_len` are refused.

use std::sync::OnceLock;

use candle_core::{Tensor, D};
use layers::{Dropout, PrecisionPolicy};

use super::ConvGeometry;
use crate::core::{AttentionError, CausalConvolver};
use crate::masks::{causal_keep_mask, lag_index};

#[derive(Debug)]
pub struct NaiveConvolver {
    max_seq_len: usize,
    dropout: Dropout,
    first_call: OnceLock<()>,
}

impl NaiveConvolver {
    /// `dropout` applies to the gathered weights while training.
    pub fn new(max_seq_len: usize, dropout: f32, seed: u64) -> Result<Self, AttentionError> {
        if max_seq_len == 0 {
            return Err(AttentionError::config("naive max_seq_len must be at least 1"));
        }
        let dropout = Dropout::new(dropout, seed)
            .map_err(|err| AttentionError::config(err.to_string()))?;
        Ok(Self {
            max_seq_len,
            dropout,
            first_call: OnceLock::new(),
        })
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Lag matrix `[..kernel_lead, N, N]` before dropout and masking.
    fn lag_weights(&self, kernel: &Tensor, len: usize) -> Result<Tensor, AttentionError> {
        let mut shape = kernel.dims().to_vec();
        let last = shape.len() - 1;
        shape.insert(last, len);
        let index = lag_index(len, kernel.device())?
            .broadcast_as(shape.as_slice())?
            .contiguous()?;
        let expanded = kernel
            .unsqueeze(last)?
            .broadcast_as(shape.as_slice())?
            .contiguous()?;
        Ok(expanded.gather(&index, D::Minus1)?)
    }
}

impl CausalConvolver for NaiveConvolver {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn convolve(&self, signal: &Tensor, kernel: &Tensor) -> Result<Tensor, AttentionError> {
        let geometry = ConvGeometry::of(signal, kernel)?;
        let len = geometry.len;
        if len > self.max_seq_len {
            return Err(AttentionError::shape(format!(
                "sequence length {len} exceeds the naive convolution limit {}",
                self.max_seq_len
            )));
        }
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::conv init strategy=naive max_seq_len={} dropout={}",
                self.max_seq_len,
                self.dropout.probability()
            );
        }

        let kernel = geometry.pad_kernel(&kernel.to_dtype(signal.dtype())?)?;
        let weights = self.lag_weights(&kernel, len)?;
        let weights = self.dropout.forward(&weights, &PrecisionPolicy::from_parameter_dtype(weights.dtype()))?;
        let mask = causal_keep_mask(len, weights.dtype(), weights.device())?;
        let weights = weights.broadcast_mul(&mask)?;
        Ok(weights.broadcast_matmul(signal)?)
    }

    fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }
}
