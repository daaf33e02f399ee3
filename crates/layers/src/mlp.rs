//! Position-wise feed-forward blocks.
//!
//! [`FeedForward`] maps `(batch, seq, hidden)` to the same layout through an
//! expansion to `intermediate_size`, a sigmoid and a contraction, with
//! dropout after the activation and after the output projection.
//! [`FeedForwardBlock`] wraps it in a post-norm residual:
//! `LayerNorm(x + FF(x))`.

use candle_core::{Error, Result, Tensor};

use crate::{
    activations,
    checks,
    dropout::Dropout,
    dtypes::PrecisionPolicy,
    linear::{Linear, LinearConfig, LinearLayer},
    norm::{LayerNorm, NormConfig},
    params::ParamStore,
};

/// Configuration for a two-projection feed-forward network.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Dropout probability used after the activation and after the output.
    pub dropout: f32,
}

impl FeedForwardConfig {
    /// `hidden -> hidden * mult -> hidden` with a sigmoid and no dropout.
    pub fn with_multiplier(hidden_size: usize, mult: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size: hidden_size * mult,
            dropout: 0.0,
        }
    }
}

/// Shared interface for feed-forward stacks.
pub trait FeedForwardLayer: Send + Sync {
    fn config(&self) -> &FeedForwardConfig;

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

pub struct FeedForward {
    config: FeedForwardConfig,
    up: Linear,
    down: Linear,
    inner_dropout: Dropout,
    output_dropout: Dropout,
}

impl std::fmt::Debug for FeedForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedForward")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FeedForward {
    /// Registers `{name}.up` and `{name}.down` projections in `store`.
    pub fn new(
        config: FeedForwardConfig,
        store: &mut ParamStore,
        name: &str,
        seed: u64,
    ) -> Result<Self> {
        if config.hidden_size == 0 || config.intermediate_size == 0 {
            return Err(Error::Msg(format!(
                "{name}: feed-forward sizes must be non-zero, got {} -> {}",
                config.hidden_size, config.intermediate_size
            )));
        }
        let up = Linear::fan_in_uniform(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            store,
            &format!("{name}.up"),
        )?;
        let down = Linear::fan_in_uniform(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            store,
            &format!("{name}.down"),
        )?;
        Ok(Self {
            inner_dropout: Dropout::new(config.dropout, seed)?,
            output_dropout: Dropout::new(config.dropout, seed.wrapping_add(1))?,
            config,
            up,
            down,
        })
    }

    pub fn set_training(&self, training: bool) {
        self.inner_dropout.set_training(training);
        self.output_dropout.set_training(training);
    }
}

impl FeedForwardLayer for FeedForward {
    fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("feed_forward.input", hidden, self.config.hidden_size)?;
        let expanded = self.up.forward(hidden, policy)?;
        let activated = activations::sigmoid(&expanded, policy)?;
        let activated = self.inner_dropout.forward(&activated, policy)?;
        let contracted = self.down.forward(&activated, policy)?;
        self.output_dropout.forward(&contracted, policy)
    }
}

/// Post-norm residual wrapper: `LayerNorm(x + FF(x))`.
#[derive(Debug)]
pub struct FeedForwardBlock {
    ff: FeedForward,
    norm: LayerNorm,
}

impl FeedForwardBlock {
    pub fn new(
        config: FeedForwardConfig,
        store: &mut ParamStore,
        name: &str,
        seed: u64,
    ) -> Result<Self> {
        let norm = LayerNorm::with_store(
            NormConfig::new(config.hidden_size),
            store,
            &format!("{name}.norm"),
        )?;
        let ff = FeedForward::new(config, store, &format!("{name}.ff"), seed)?;
        Ok(Self { ff, norm })
    }

    pub fn set_training(&self, training: bool) {
        self.ff.set_training(training);
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let branch = self.ff.forward(hidden, policy)?;
        let summed = policy.cast_to_storage(
            &policy
                .cast_for_matmul(hidden)?
                .add(&policy.cast_for_matmul(&branch)?)?,
        )?;
        self.norm.forward(&summed, policy)
    }
}
