//! Sigmoid gate of the encoder feed-forward block.
//!
//! The input is promoted to [`PrecisionPolicy::compute`], passed through
//! `1 / (1 + exp(-x))` and cast back to the storage dtype. Any rank works and
//! the layout is preserved.

use candle_core::{Result, Tensor};

use crate::dtypes::PrecisionPolicy;

pub fn sigmoid(input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
    let activated = candle_nn::ops::sigmoid(&policy.cast_for_matmul(input)?)?;
    policy.cast_to_storage(&activated)
}
