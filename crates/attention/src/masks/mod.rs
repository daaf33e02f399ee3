//! Index and mask utilities for the quadratic convolution path.

pub mod causal;

pub use causal::{causal_keep_mask, gather_index, lag_index};

#[cfg(test)]
mod tests;
