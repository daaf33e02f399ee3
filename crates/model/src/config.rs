use std::path::Path;

use attention::core::DEFAULT_NAIVE_MAX_SEQ_LEN;
use attention::{ConvolutionStrategy, FrequencyConfig, MhesaConfig};
use candle_core::DType;
use embedding::InputEmbeddingConfig;
use layers::FeedForwardConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Storage precision for every registered parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    F16,
    Bf16,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

/// Which term the level module adds to the smoothed, de-seasonalised series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthTerm {
    /// `conv(x, alpha * (1 - alpha)^p)`; the growth projection is unused.
    #[default]
    RawSeries,
    /// `conv(to_growth(latent_growth), (1 - alpha)^p)`.
    ProjectedLatent,
}

/// High-level configuration for assembling an ETSformer.
///
/// Only `time_features` and `model_dim` are required when deserialising;
/// every other field falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub time_features: usize,
    pub model_dim: usize,
    #[serde(default = "defaults::embed_kernel_size")]
    pub embed_kernel_size: usize,
    #[serde(default = "defaults::layers")]
    pub layers: usize,
    #[serde(default = "defaults::heads")]
    pub heads: usize,
    #[serde(default = "defaults::dim_head")]
    pub dim_head: usize,
    #[serde(default = "defaults::top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub dropout: f32,
    #[serde(default)]
    pub ff_dropout: f32,
    #[serde(default = "defaults::ff_mult")]
    pub ff_mult: usize,
    #[serde(default)]
    pub strategy: ConvolutionStrategy,
    #[serde(default)]
    pub growth_term: GrowthTerm,
    /// Drops the feed-forward block from the final encoder layer.
    #[serde(default)]
    pub skip_last_feed_forward: bool,
    #[serde(default = "defaults::naive_max_seq_len")]
    pub naive_max_seq_len: usize,
    #[serde(default)]
    pub precision: Precision,
    /// Seeds parameter initialisation and every dropout generator.
    #[serde(default)]
    pub seed: u64,
}

mod defaults {
    pub fn embed_kernel_size() -> usize {
        3
    }

    pub fn layers() -> usize {
        2
    }

    pub fn heads() -> usize {
        8
    }

    pub fn dim_head() -> usize {
        32
    }

    pub fn top_k() -> usize {
        4
    }

    pub fn ff_mult() -> usize {
        4
    }

    pub fn naive_max_seq_len() -> usize {
        super::DEFAULT_NAIVE_MAX_SEQ_LEN
    }
}

impl ModelConfig {
    pub fn new(time_features: usize, model_dim: usize) -> Self {
        Self {
            time_features,
            model_dim,
            embed_kernel_size: defaults::embed_kernel_size(),
            layers: defaults::layers(),
            heads: defaults::heads(),
            dim_head: defaults::dim_head(),
            top_k: defaults::top_k(),
            dropout: 0.0,
            ff_dropout: 0.0,
            ff_mult: defaults::ff_mult(),
            strategy: ConvolutionStrategy::default(),
            growth_term: GrowthTerm::default(),
            skip_last_feed_forward: false,
            naive_max_seq_len: defaults::naive_max_seq_len(),
            precision: Precision::default(),
            seed: 0,
        }
    }

    /// Loads a config from TOML (`.toml`, `.tml` or no extension) or JSON
    /// (`.json`) and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).map_err(|source| ModelError::Json {
                path: path.to_path_buf(),
                source,
            })?,
            Some("toml") | Some("tml") | None => {
                toml::from_str(&contents).map_err(|source| ModelError::Toml {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            Some(other) => {
                return Err(ModelError::ConfigFormat(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        log::debug!("loaded model config from {}", path.display());
        Ok(config)
    }

    /// Checks every rule and reports all violations at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        for (name, value) in [
            ("time_features", self.time_features),
            ("model_dim", self.model_dim),
            ("layers", self.layers),
            ("heads", self.heads),
            ("dim_head", self.dim_head),
            ("top_k", self.top_k),
            ("ff_mult", self.ff_mult),
            ("naive_max_seq_len", self.naive_max_seq_len),
        ] {
            if value == 0 {
                problems.push(format!("{name} must be greater than zero"));
            }
        }
        if self.embed_kernel_size % 2 == 0 {
            problems.push(format!(
                "embed_kernel_size must be odd, got {}",
                self.embed_kernel_size
            ));
        }
        for (name, p) in [("dropout", self.dropout), ("ff_dropout", self.ff_dropout)] {
            if !(0.0..1.0).contains(&p) {
                problems.push(format!("{name} must be in [0, 1), got {p}"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ModelError::Validation(problems))
        }
    }

    pub fn dtype(&self) -> DType {
        self.precision.dtype()
    }

    pub fn embedding_config(&self) -> InputEmbeddingConfig {
        InputEmbeddingConfig {
            kernel_size: self.embed_kernel_size,
            dropout: self.dropout,
            ..InputEmbeddingConfig::new(self.time_features, self.model_dim)
        }
    }

    pub fn mhesa_config(&self) -> MhesaConfig {
        MhesaConfig {
            dropout: self.dropout,
            strategy: self.strategy,
            naive_max_seq_len: self.naive_max_seq_len,
            ..MhesaConfig::new(self.model_dim, self.heads, self.dim_head)
        }
    }

    pub fn frequency_config(&self) -> FrequencyConfig {
        FrequencyConfig {
            dropout: self.dropout,
            ..FrequencyConfig::new(self.top_k)
        }
    }

    pub fn feed_forward_config(&self) -> FeedForwardConfig {
        FeedForwardConfig {
            dropout: self.ff_dropout,
            ..FeedForwardConfig::with_multiplier(self.model_dim, self.ff_mult)
        }
    }

    /// Whether encoder layer `index` carries a feed-forward block.
    pub fn has_feed_forward(&self, index: usize) -> bool {
        !(self.skip_last_feed_forward && index + 1 == self.layers)
    }
}
