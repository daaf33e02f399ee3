//! Embedding crate
//!
//! Maps raw multivariate series into the latent width used by the encoder.

pub mod conv;

pub use conv::{InputEmbedding, InputEmbeddingConfig};
