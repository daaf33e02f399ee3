//! Multi-head exponential smoothing attention (MHESA).
//!
//! The latent series is projected to `heads * dim_head`, split into heads and
//! differenced against a learned initial state. Each head then applies simple
//! exponential smoothing with its own coefficient `alpha = sigmoid(logit)`:
//!
//! ```text
//! s[t] = alpha * v[t] + (1 - alpha) * s[t - 1],    s[-1] = initial_state
//! ```
//!
//! evaluated in closed form as a causal convolution plus the decayed initial
//! state. Heads are merged and projected back to `model_dim`.

use std::sync::OnceLock;

use candle_core::Tensor;
use layers::{checks, Linear, LinearConfig, LinearLayer, ParamStore, PrecisionPolicy};

use crate::conv;
use crate::core::{AttentionError, CausalConvolver, MhesaConfig};
use crate::decay;

/// Learnable tensors of one MHESA layer.
#[derive(Debug, Clone)]
pub struct MhesaParams {
    /// `[heads]`, smoothing coefficients before the sigmoid.
    pub alpha_logits: Tensor,
    /// `[heads, dim_head]`
    pub initial_state: Tensor,
    pub project_in: Linear,
    pub project_out: Linear,
}

impl MhesaParams {
    /// Registers `{name}.alpha`, `{name}.initial_state`, `{name}.project_in`
    /// and `{name}.project_out`. Logits and initial state are standard normal.
    pub fn new(
        config: &MhesaConfig,
        store: &mut ParamStore,
        name: &str,
    ) -> Result<Self, AttentionError> {
        let inner = config.inner_dim();
        let initial_state = store.normal(
            &format!("{name}.initial_state"),
            (config.heads, config.dim_head),
            0.0,
            1.0,
        )?;
        let alpha_logits = store.normal(&format!("{name}.alpha"), config.heads, 0.0, 1.0)?;
        let project_in = Linear::fan_in_uniform(
            LinearConfig::new(config.model_dim, inner),
            store,
            &format!("{name}.project_in"),
        )?;
        let project_out = Linear::fan_in_uniform(
            LinearConfig::new(inner, config.model_dim),
            store,
            &format!("{name}.project_out"),
        )?;
        Ok(Self {
            alpha_logits,
            initial_state,
            project_in,
            project_out,
        })
    }

    fn validate(&self, config: &MhesaConfig) -> Result<(), AttentionError> {
        checks::expect_shape("mhesa.alpha", &self.alpha_logits, &[config.heads])?;
        checks::expect_shape(
            "mhesa.initial_state",
            &self.initial_state,
            &[config.heads, config.dim_head],
        )?;
        let inner = config.inner_dim();
        let in_cfg = self.project_in.config();
        let out_cfg = self.project_out.config();
        if (in_cfg.input_dim, in_cfg.output_dim) != (config.model_dim, inner)
            || (out_cfg.input_dim, out_cfg.output_dim) != (inner, config.model_dim)
        {
            return Err(AttentionError::shape(format!(
                "mhesa projections must map {} -> {inner} -> {}",
                config.model_dim, config.model_dim
            )));
        }
        Ok(())
    }
}

pub struct MultiHeadEsAttention {
    config: MhesaConfig,
    params: MhesaParams,
    convolver: Box<dyn CausalConvolver>,
    policy: PrecisionPolicy,
    first_call: OnceLock<()>,
}

impl std::fmt::Debug for MultiHeadEsAttention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHeadEsAttention")
            .field("config", &self.config)
            .field("convolver", &self.convolver.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl MultiHeadEsAttention {
    /// Registers fresh parameters under `name`; `seed` drives weight dropout.
    pub fn new(
        config: MhesaConfig,
        store: &mut ParamStore,
        name: &str,
        seed: u64,
    ) -> Result<Self, AttentionError> {
        validate_config(&config)?;
        let params = MhesaParams::new(&config, store, name)?;
        let policy = PrecisionPolicy::from_parameter_dtype(store.dtype());
        Self::from_params(config, params, policy, seed)
    }

    /// Wraps existing parameters.
    pub fn from_params(
        config: MhesaConfig,
        params: MhesaParams,
        policy: PrecisionPolicy,
        seed: u64,
    ) -> Result<Self, AttentionError> {
        validate_config(&config)?;
        params.validate(&config)?;
        let convolver =
            conv::convolver(config.strategy, config.naive_max_seq_len, config.dropout, seed)?;
        Ok(Self {
            config,
            params,
            convolver,
            policy,
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &MhesaConfig {
        &self.config
    }

    pub fn params(&self) -> &MhesaParams {
        &self.params
    }

    pub fn convolver(&self) -> &dyn CausalConvolver {
        self.convolver.as_ref()
    }

    pub fn set_training(&self, training: bool) {
        self.convolver.set_training(training);
    }

    /// `[batch, time, model_dim] -> [batch, time, model_dim]` with the
    /// configured strategy.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        self.forward_with(x, self.convolver.as_ref())
    }

    /// Same as [`forward`](Self::forward) with an explicit convolution strategy.
    pub fn forward_with(
        &self,
        x: &Tensor,
        convolver: &dyn CausalConvolver,
    ) -> Result<Tensor, AttentionError> {
        checks::expect_batch_seq_hidden("mhesa.input", x, self.config.model_dim)?;
        let (batch, len, _) = x.dims3()?;
        let (heads, dim_head) = (self.config.heads, self.config.dim_head);
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::mhesa init heads={heads} dim_head={dim_head} strategy={} policy={:?}",
                convolver.name(),
                self.policy
            );
        }

        let projected = self.params.project_in.forward(x, &self.policy)?;
        let split = self
            .policy
            .cast_for_matmul(&projected)?
            .reshape((batch, len, heads, dim_head))?
            .transpose(1, 2)?
            .contiguous()?;

        let initial = self.policy.cast_for_matmul(&self.params.initial_state)?;
        let first = initial
            .unsqueeze(0)?
            .unsqueeze(2)?
            .broadcast_as((batch, heads, 1, dim_head))?
            .contiguous()?;
        let stacked = Tensor::cat(&[&first, &split], 2)?;
        let diffs = (stacked.narrow(2, 1, len)? - stacked.narrow(2, 0, len)?)?;

        let alpha =
            decay::alpha_from_logits(&self.policy.cast_for_matmul(&self.params.alpha_logits)?)?;
        let weights = decay::smoothing_weights(&alpha, len)?;
        let smoothed = convolver.convolve(&diffs, &weights)?;

        let carried = decay::initial_state_weights(&alpha, len)?
            .unsqueeze(2)?
            .broadcast_mul(&initial.unsqueeze(1)?)?;
        let smoothed = smoothed.broadcast_add(&carried)?;

        let merged = smoothed
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, len, heads * dim_head))?;
        let merged = self.policy.cast_to_storage(&merged)?;
        Ok(self.params.project_out.forward(&merged, &self.policy)?)
    }
}

fn validate_config(config: &MhesaConfig) -> Result<(), AttentionError> {
    if config.model_dim == 0 || config.heads == 0 || config.dim_head == 0 {
        return Err(AttentionError::config(format!(
            "mhesa dims must be non-zero: model_dim={} heads={} dim_head={}",
            config.model_dim, config.heads, config.dim_head
        )));
    }
    Ok(())
}
