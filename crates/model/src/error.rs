use std::path::PathBuf;

use attention::AttentionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML in '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported config format: {0}")]
    ConfigFormat(String),

    #[error("invalid model config: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("forecast horizon must be at least one step")]
    EmptyHorizon,

    #[error(transparent)]
    Attention(#[from] AttentionError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}
