//! Configuration for the smoothing and frequency operators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Selects how MHESA evaluates its causal convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvolutionStrategy {
    /// Transform-domain product, `O(N log N)` per series.
    #[default]
    Fft,
    /// Materialised `[N, N]` weight matrix, `O(N^2)` per head.
    Naive,
}

impl fmt::Display for ConvolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvolutionStrategy::Fft => f.write_str("fft"),
            ConvolutionStrategy::Naive => f.write_str("naive"),
        }
    }
}

/// Default sequence-length ceiling for the quadratic reference path.
pub const DEFAULT_NAIVE_MAX_SEQ_LEN: usize = 2048;

/// Multi-head exponential smoothing attention settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MhesaConfig {
    pub model_dim: usize,
    pub heads: usize,
    pub dim_head: usize,
    /// Dropout on the gathered smoothing weights (naive strategy only).
    pub dropout: f32,
    pub strategy: ConvolutionStrategy,
    /// Longest sequence the naive strategy accepts.
    pub naive_max_seq_len: usize,
}

impl MhesaConfig {
    pub fn new(model_dim: usize, heads: usize, dim_head: usize) -> Self {
        Self {
            model_dim,
            heads,
            dim_head,
            dropout: 0.0,
            strategy: ConvolutionStrategy::Fft,
            naive_max_seq_len: DEFAULT_NAIVE_MAX_SEQ_LEN,
        }
    }

    /// `heads * dim_head`
    pub fn inner_dim(&self) -> usize {
        self.heads * self.dim_head
    }
}

/// Top-K frequency filter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyConfig {
    /// Number of spectrum bins kept per series.
    pub top_k: usize,
    /// Dropout on amplitudes before ranking, training only.
    pub dropout: f32,
}

impl FrequencyConfig {
    pub fn new(top_k: usize) -> Self {
        Self { top_k, dropout: 0.0 }
    }
}
