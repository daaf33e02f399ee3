//! Convolutional input embedding for multivariate series.
//!
//! A `Conv1d(time_features -> model_dim)` slides over the time axis with
//! `padding = kernel_size / 2`, so odd kernels keep the sequence length. The
//! result is followed by dropout.

use candle_core::{bail, Result, Tensor};
use layers::{checks, Dropout, ParamStore, PrecisionPolicy};

/// Configuration for [`InputEmbedding`].
#[derive(Debug, Clone, PartialEq)]
pub struct InputEmbeddingConfig {
    /// Number of input series (channels) per time step.
    pub time_features: usize,
    /// Width of the latent representation.
    pub model_dim: usize,
    /// Temporal kernel width; must be odd.
    pub kernel_size: usize,
    /// Dropout applied to the embedded sequence.
    pub dropout: f32,
}

impl InputEmbeddingConfig {
    pub fn new(time_features: usize, model_dim: usize) -> Self {
        Self {
            time_features,
            model_dim,
            kernel_size: 3,
            dropout: 0.0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.time_features == 0 || self.model_dim == 0 {
            bail!(
                "input embedding requires non-zero dims, got {} -> {}",
                self.time_features,
                self.model_dim
            );
        }
        if self.kernel_size % 2 == 0 {
            bail!(
                "input embedding kernel size must be odd to preserve length, got {}",
                self.kernel_size
            );
        }
        Ok(())
    }
}

/// `[batch, time, time_features] -> [batch, time, model_dim]`.
#[derive(Debug, Clone)]
pub struct InputEmbedding {
    config: InputEmbeddingConfig,
    /// `(model_dim, time_features, kernel_size)`
    weight: Tensor,
    bias: Tensor,
    dropout: Dropout,
}

impl InputEmbedding {
    /// Registers `{name}.weight` and `{name}.bias`, both drawn from
    /// `U(-1/sqrt(time_features * kernel_size), +..)`.
    pub fn new(
        config: InputEmbeddingConfig,
        store: &mut ParamStore,
        name: &str,
        seed: u64,
    ) -> Result<Self> {
        config.validate()?;
        let bound = 1.0 / ((config.time_features * config.kernel_size) as f64).sqrt();
        let weight = store.uniform(
            &format!("{name}.weight"),
            (config.model_dim, config.time_features, config.kernel_size),
            bound,
        )?;
        let bias = store.uniform(&format!("{name}.bias"), config.model_dim, bound)?;
        let dropout = Dropout::new(config.dropout, seed)?;
        Ok(Self {
            config,
            weight,
            bias,
            dropout,
        })
    }

    pub fn config(&self) -> &InputEmbeddingConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn forward(&self, series: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("embedding.input", series, self.config.time_features)?;

        let input = policy.cast_for_matmul(&series.transpose(1, 2)?.contiguous()?)?;
        let weight = policy.cast_for_matmul(&self.weight)?;
        let bias = policy
            .cast_for_matmul(&self.bias)?
            .reshape((1, self.config.model_dim, 1))?;

        let conv = input.conv1d(&weight, self.config.kernel_size / 2, 1, 1, 1)?;
        let embedded = conv.broadcast_add(&bias)?.transpose(1, 2)?.contiguous()?;
        let embedded = policy.cast_to_storage(&embedded)?;
        self.dropout.forward(&embedded, policy)
    }
}
