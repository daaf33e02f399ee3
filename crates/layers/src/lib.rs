//! Building blocks shared by the ETSformer crates.
//!
//! Everything here speaks the `(batch, seq, hidden)` layout and routes dtype
//! decisions through [`dtypes::PrecisionPolicy`]. Learnable tensors are created
//! through [`params::ParamStore`], which keeps them in a single `VarMap`.

pub mod activations;
pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod params;

pub use dropout::Dropout;
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearLayer};
pub use mlp::{FeedForward, FeedForwardBlock, FeedForwardConfig, FeedForwardLayer};
pub use norm::{LayerNorm, NormConfig};
pub use params::ParamStore;
