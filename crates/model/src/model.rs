use std::path::Path;

use attention::{CausalConvolver, ConvolutionStrategy};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use embedding::InputEmbedding;
use layers::{checks, ParamStore, PrecisionPolicy};

use crate::{
    block::EncoderLayer,
    config::ModelConfig,
    decoder::LevelStack,
    error::{ModelError, Result},
};

/// ETSformer assembled from the shared crates: convolutional embedding,
/// a stack of encoder layers and the level-stack decoder.
#[derive(Debug)]
pub struct EtsFormer {
    config: ModelConfig,
    store: ParamStore,
    embedding: InputEmbedding,
    layers: Vec<EncoderLayer>,
    decoder: LevelStack,
    policy: PrecisionPolicy,
}

impl EtsFormer {
    /// Validates `config` and registers every parameter on `device`.
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let mut store = ParamStore::new(config.seed, config.dtype(), device);
        let policy = PrecisionPolicy::from_parameter_dtype(config.dtype());

        let embedding =
            InputEmbedding::new(config.embedding_config(), &mut store, "embed", config.seed)?;
        let layers = (0..config.layers)
            .map(|index| EncoderLayer::new(index, &config, &mut store))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "model::etsformer init layers={} model_dim={} heads={} dim_head={} top_k={} strategy={} growth_term={:?} params={}",
            config.layers,
            config.model_dim,
            config.heads,
            config.dim_head,
            config.top_k,
            config.strategy,
            config.growth_term,
            store.len()
        );

        Ok(Self {
            config,
            store,
            embedding,
            layers,
            decoder: LevelStack,
            policy,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Every learnable tensor, keyed by its dotted name.
    pub fn parameters(&self) -> &VarMap {
        self.store.varmap()
    }

    pub fn layers(&self) -> &[EncoderLayer] {
        &self.layers
    }

    pub fn set_training(&self, training: bool) {
        self.embedding.set_training(training);
        for layer in &self.layers {
            layer.set_training(training);
        }
    }

    /// Writes the parameters as safetensors.
    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        Ok(self.store.varmap().save(path)?)
    }

    /// Overwrites the parameters in place from a safetensors file.
    pub fn load_weights(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.store.varmap_mut().load(path)?;
        log::info!("model::etsformer loaded weights from {}", path.display());
        Ok(())
    }

    /// `[batch, time, time_features] -> [batch, steps, time_features]`.
    pub fn forward(&self, x: &Tensor, steps: usize) -> Result<Tensor> {
        self.run(x, steps, None)
    }

    /// Runs the same parameters with every causal convolution routed
    /// through `convolver`.
    pub fn forward_with(
        &self,
        x: &Tensor,
        steps: usize,
        convolver: &dyn CausalConvolver,
    ) -> Result<Tensor> {
        self.run(x, steps, Some(convolver))
    }

    /// Runs the same parameters through a freshly built `strategy` convolver
    /// without weight dropout.
    pub fn forward_with_strategy(
        &self,
        x: &Tensor,
        steps: usize,
        strategy: ConvolutionStrategy,
    ) -> Result<Tensor> {
        let convolver =
            attention::convolver(strategy, self.config.naive_max_seq_len, 0.0, self.config.seed)?;
        self.forward_with(x, steps, convolver.as_ref())
    }

    fn run(
        &self,
        x: &Tensor,
        steps: usize,
        convolver: Option<&dyn CausalConvolver>,
    ) -> Result<Tensor> {
        if steps == 0 {
            return Err(ModelError::EmptyHorizon);
        }
        checks::expect_batch_seq_hidden("etsformer.input", x, self.config.time_features)?;
        let x = self.policy.cast_to_storage(x)?;

        let mut latent = self.embedding.forward(&x, &self.policy)?;
        let mut level = x;
        for layer in &self.layers {
            let out = match convolver {
                Some(convolver) => layer.forward_with(&level, &latent, convolver)?,
                None => layer.forward(&level, &latent)?,
            };
            latent = out.latent;
            level = out.level;
        }
        self.decoder.forward(&level, steps)
    }
}
