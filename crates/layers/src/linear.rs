//! Dense projections over the last axis.
//!
//! Inputs are `(batch, time, in_dim)` or `(rows, in_dim)`; weights are stored
//! `(out_dim, in_dim)`. The product runs in the policy's compute dtype and the
//! result is cast back to storage.

use candle_core::{bail, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy, params::ParamStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    pub bias: bool,
}

impl LinearConfig {
    /// Projection with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }
}

/// Shared interface for affine projections.
pub trait LinearLayer: Send + Sync {
    fn config(&self) -> &LinearConfig;

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor>;
}

#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Wraps existing tensors after checking their shapes against `config`.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        checks::expect_shape(
            "linear.weight",
            &weight,
            &[config.output_dim, config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", &weight, &checks::FLOAT_DTYPES)?;
        match (&bias, config.bias) {
            (Some(bias), true) => {
                checks::expect_shape("linear.bias", bias, &[config.output_dim])?;
                checks::expect_same_dtype("linear.weight", &weight, "linear.bias", bias)?;
            }
            (None, false) => {}
            (Some(_), false) => bail!("linear.bias supplied but the config disables bias"),
            (None, true) => bail!("linear.bias required by the config but missing"),
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Registers `{name}.weight` and `{name}.bias` drawn from
    /// `U(-1/sqrt(input_dim), 1/sqrt(input_dim))`.
    pub fn fan_in_uniform(config: LinearConfig, store: &mut ParamStore, name: &str) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim == 0 {
            bail!(
                "{name}: linear dimensions must be non-zero, got {} -> {}",
                config.input_dim,
                config.output_dim
            );
        }
        let bound = 1.0 / (config.input_dim as f64).sqrt();
        let weight = store.uniform(
            &format!("{name}.weight"),
            (config.output_dim, config.input_dim),
            bound,
        )?;
        let bias = if config.bias {
            Some(store.uniform(&format!("{name}.bias"), config.output_dim, bound)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}

impl LinearLayer for Linear {
    fn config(&self) -> &LinearConfig {
        &self.config
    }

    fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        let (in_dim, out_dim) = (self.config.input_dim, self.config.output_dim);
        let weight_t = policy.cast_for_matmul(&self.weight)?.t()?;
        let input = policy.cast_for_matmul(hidden)?;
        let mut output = match *hidden.dims() {
            [batch, time, _] => {
                checks::expect_batch_seq_hidden("linear.input", hidden, in_dim)?;
                input
                    .reshape((batch * time, in_dim))?
                    .matmul(&weight_t)?
                    .reshape((batch, time, out_dim))?
            }
            [rows, width] if width == in_dim && rows > 0 => input.matmul(&weight_t)?,
            _ => bail!(
                "linear.input: expected [batch, time, {in_dim}] or [rows, {in_dim}], got {:?}",
                hidden.dims()
            ),
        };
        if let Some(bias) = &self.bias {
            output = output.broadcast_add(&policy.cast_for_matmul(bias)?)?;
        }
        policy.cast_to_storage(&output)
    }
}
