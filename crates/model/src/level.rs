//! Level module: exponential smoothing of the de-seasonalised input series.
//!
//! ```text
//! level = conv(x - to_seasonal(latent_seasonal), w) + growth_term,    w = alpha * (1 - alpha)^p
//! ```
//!
//! `x` is the raw `[batch, time, time_features]` series, the latents are
//! `[batch, time, model_dim]` outputs of the frequency and smoothing
//! attention of the same encoder layer.

use attention::decay;
use attention::{CausalConvolver, FftConvolver};
use candle_core::Tensor;
use layers::{checks, Linear, LinearConfig, LinearLayer, ParamStore, PrecisionPolicy};

use crate::config::GrowthTerm;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct LevelParams {
    /// `[1]`, starts at zero so the initial coefficient is one half.
    pub alpha_logit: Tensor,
    pub to_seasonal: Linear,
    pub to_growth: Linear,
}

impl LevelParams {
    /// Registers `{name}.alpha`, `{name}.to_seasonal` and `{name}.to_growth`.
    pub fn new(
        time_features: usize,
        model_dim: usize,
        store: &mut ParamStore,
        name: &str,
    ) -> Result<Self> {
        let alpha_logit = store.constant(&format!("{name}.alpha"), 1, 0.0)?;
        let projection = |store: &mut ParamStore, suffix: &str| {
            Linear::fan_in_uniform(
                LinearConfig::new(model_dim, time_features),
                store,
                &format!("{name}.{suffix}"),
            )
        };
        let to_seasonal = projection(store, "to_seasonal")?;
        let to_growth = projection(store, "to_growth")?;
        Ok(Self {
            alpha_logit,
            to_seasonal,
            to_growth,
        })
    }
}

#[derive(Debug)]
pub struct Level {
    time_features: usize,
    model_dim: usize,
    growth_term: GrowthTerm,
    params: LevelParams,
    policy: PrecisionPolicy,
    convolver: FftConvolver,
}

impl Level {
    pub fn new(
        time_features: usize,
        model_dim: usize,
        growth_term: GrowthTerm,
        store: &mut ParamStore,
        name: &str,
    ) -> Result<Self> {
        let params = LevelParams::new(time_features, model_dim, store, name)?;
        let policy = PrecisionPolicy::from_parameter_dtype(store.dtype());
        Ok(Self::from_params(
            time_features,
            model_dim,
            growth_term,
            params,
            policy,
        ))
    }

    pub fn from_params(
        time_features: usize,
        model_dim: usize,
        growth_term: GrowthTerm,
        params: LevelParams,
        policy: PrecisionPolicy,
    ) -> Self {
        Self {
            time_features,
            model_dim,
            growth_term,
            params,
            policy,
            convolver: FftConvolver::new(),
        }
    }

    pub fn params(&self) -> &LevelParams {
        &self.params
    }

    pub fn growth_term(&self) -> GrowthTerm {
        self.growth_term
    }

    pub fn forward(
        &self,
        x: &Tensor,
        latent_seasonal: &Tensor,
        latent_growth: &Tensor,
    ) -> Result<Tensor> {
        self.forward_with(x, latent_seasonal, latent_growth, &self.convolver)
    }

    /// Same as [`forward`](Self::forward) with an explicit convolution strategy.
    pub fn forward_with(
        &self,
        x: &Tensor,
        latent_seasonal: &Tensor,
        latent_growth: &Tensor,
        convolver: &dyn CausalConvolver,
    ) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("level.input", x, self.time_features)?;
        for (label, latent) in [
            ("level.latent_seasonal", latent_seasonal),
            ("level.latent_growth", latent_growth),
        ] {
            checks::expect_batch_seq_hidden(label, latent, self.model_dim)?;
        }
        let len = x.dim(1)?;

        let alpha =
            decay::alpha_from_logits(&self.policy.cast_for_matmul(&self.params.alpha_logit)?)?;
        let smoothing = decay::smoothing_weights(&alpha, len)?;

        let x = self.policy.cast_for_matmul(x)?;
        let seasonal = self.policy.cast_for_matmul(
            &self.params.to_seasonal.forward(latent_seasonal, &self.policy)?,
        )?;
        let level = convolver.convolve(&(&x - seasonal)?, &smoothing)?;

        let growth = match self.growth_term {
            GrowthTerm::RawSeries => convolver.convolve(&x, &smoothing)?,
            GrowthTerm::ProjectedLatent => {
                let growth = self.policy.cast_for_matmul(
                    &self.params.to_growth.forward(latent_growth, &self.policy)?,
                )?;
                convolver.convolve(&growth, &decay::growth_weights(&alpha, len)?)?
            }
        };
        Ok(self.policy.cast_to_storage(&(level + growth)?)?)
    }
}
