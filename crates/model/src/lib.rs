//! ETSformer assembly: configuration, the level module, encoder layers and
//! the level-stack decoder on top of the `attention` operators.

pub mod block;
pub mod config;
pub mod decoder;
pub mod error;
pub mod level;
pub mod model;

pub use block::{EncoderLayer, EncoderOutput};
pub use config::{GrowthTerm, ModelConfig, Precision};
pub use decoder::LevelStack;
pub use error::{ModelError, Result};
pub use level::{Level, LevelParams};
pub use model::EtsFormer;
