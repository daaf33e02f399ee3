use std::fmt;

use attention::{CausalConvolver, FrequencyAttention, MultiHeadEsAttention};
use candle_core::Tensor;
use layers::{FeedForwardBlock, LayerNorm, NormConfig, ParamStore, PrecisionPolicy};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::level::Level;

/// Output of one encoder layer.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    /// Latent residual handed to the next layer, `[batch, time, model_dim]`.
    pub latent: Tensor,
    /// Level estimate of the raw series, `[batch, time, time_features]`.
    pub level: Tensor,
    pub seasonal: Tensor,
    pub growth: Tensor,
}

/// One ETSformer encoder layer: peel off seasonality, then growth, normalise,
/// optionally refine with a feed-forward block and update the level.
pub struct EncoderLayer {
    index: usize,
    frequency: FrequencyAttention,
    mhesa: MultiHeadEsAttention,
    post_attention_norm: LayerNorm,
    feed_forward: Option<FeedForwardBlock>,
    level: Level,
    policy: PrecisionPolicy,
}

impl fmt::Debug for EncoderLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderLayer")
            .field("index", &self.index)
            .field("mhesa", &self.mhesa)
            .field("feed_forward", &self.feed_forward.is_some())
            .field("growth_term", &self.level.growth_term())
            .finish()
    }
}

impl EncoderLayer {
    /// Registers every parameter of layer `index` under `encoder.{index}`.
    pub fn new(index: usize, config: &ModelConfig, store: &mut ParamStore) -> Result<Self> {
        let prefix = format!("encoder.{index}");
        // Every dropout source in the layer gets its own stream.
        let seed = config.seed.wrapping_add(1 + 8 * index as u64);
        let policy = PrecisionPolicy::from_parameter_dtype(store.dtype());

        let frequency = FrequencyAttention::new(config.frequency_config(), seed)?;
        let mhesa = MultiHeadEsAttention::new(
            config.mhesa_config(),
            store,
            &format!("{prefix}.mhesa"),
            seed.wrapping_add(1),
        )?;
        let post_attention_norm = LayerNorm::with_store(
            NormConfig::new(config.model_dim),
            store,
            &format!("{prefix}.norm"),
        )?;
        let feed_forward = if config.has_feed_forward(index) {
            Some(FeedForwardBlock::new(
                config.feed_forward_config(),
                store,
                &format!("{prefix}.feed_forward"),
                seed.wrapping_add(2),
            )?)
        } else {
            None
        };
        let level = Level::new(
            config.time_features,
            config.model_dim,
            config.growth_term,
            store,
            &format!("{prefix}.level"),
        )?;

        Ok(Self {
            index,
            frequency,
            mhesa,
            post_attention_norm,
            feed_forward,
            level,
            policy,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_feed_forward(&self) -> bool {
        self.feed_forward.is_some()
    }

    pub fn mhesa(&self) -> &MultiHeadEsAttention {
        &self.mhesa
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn set_training(&self, training: bool) {
        self.frequency.set_training(training);
        self.mhesa.set_training(training);
        if let Some(block) = &self.feed_forward {
            block.set_training(training);
        }
    }

    /// `x` is the raw series, `latent` the embedded one.
    pub fn forward(&self, x: &Tensor, latent: &Tensor) -> Result<EncoderOutput> {
        self.run(x, latent, None)
    }

    /// Same as [`forward`](Self::forward) with every causal convolution
    /// routed through `convolver`.
    pub fn forward_with(
        &self,
        x: &Tensor,
        latent: &Tensor,
        convolver: &dyn CausalConvolver,
    ) -> Result<EncoderOutput> {
        self.run(x, latent, Some(convolver))
    }

    fn run(
        &self,
        x: &Tensor,
        latent: &Tensor,
        convolver: Option<&dyn CausalConvolver>,
    ) -> Result<EncoderOutput> {
        let seasonal = self.frequency.forward(latent)?;
        let latent = (latent - &seasonal)?;

        let growth = match convolver {
            Some(convolver) => self.mhesa.forward_with(&latent, convolver)?,
            None => self.mhesa.forward(&latent)?,
        };
        let latent = (latent - &growth)?;

        let mut latent = self.post_attention_norm.forward(&latent, &self.policy)?;
        if let Some(block) = &self.feed_forward {
            latent = block.forward(&latent, &self.policy)?;
        }

        let level = match convolver {
            Some(convolver) => self.level.forward_with(x, &seasonal, &growth, convolver)?,
            None => self.level.forward(x, &seasonal, &growth)?,
        };
        Ok(EncoderOutput {
            latent,
            level,
            seasonal,
            growth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn small_config() -> ModelConfig {
        ModelConfig {
            layers: 2,
            heads: 2,
            dim_head: 4,
            top_k: 2,
            ..ModelConfig::new(1, 8)
        }
    }

    #[test]
    fn forward_preserves_layouts() -> Result<()> {
        let device = Device::Cpu;
        let mut store = ParamStore::new(0, DType::F32, &device);
        let layer = EncoderLayer::new(0, &small_config(), &mut store)?;
        let x = Tensor::randn(0f32, 1.0, (2, 12, 1), &device)?;
        let latent = Tensor::randn(0f32, 1.0, (2, 12, 8), &device)?;
        let out = layer.forward(&x, &latent)?;
        assert_eq!(out.latent.dims(), &[2, 12, 8]);
        assert_eq!(out.seasonal.dims(), &[2, 12, 8]);
        assert_eq!(out.growth.dims(), &[2, 12, 8]);
        assert_eq!(out.level.dims(), &[2, 12, 1]);
        Ok(())
    }

    #[test]
    fn last_layer_can_skip_the_feed_forward_block() -> Result<()> {
        let device = Device::Cpu;
        let config = ModelConfig {
            skip_last_feed_forward: true,
            ..small_config()
        };
        let mut store = ParamStore::new(0, DType::F32, &device);
        let first = EncoderLayer::new(0, &config, &mut store)?;
        let last = EncoderLayer::new(1, &config, &mut store)?;
        assert!(first.has_feed_forward());
        assert!(!last.has_feed_forward());
        Ok(())
    }
}
