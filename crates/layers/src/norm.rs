//! Layer normalisation with unified shape and dtype handling.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Normalisation happens
//! along the last axis while preserving the original layout. Statistics (mean,
//! variance) are computed in [`STATISTICS_DTYPE`](crate::dtypes::STATISTICS_DTYPE)
//! before the output is cast back.

use candle_core::{Error, Result, Tensor, D};

use crate::{checks, dtypes::PrecisionPolicy, params::ParamStore};

/// Configuration shared by layer norms.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser applied to the variance.
    pub epsilon: f64,
    /// Whether post-normalisation affine parameters are learned.
    pub elementwise_affine: bool,
}

impl NormConfig {
    /// Creates a configuration with `epsilon = 1e-5` and affine parameters.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
            elementwise_affine: true,
        }
    }
}

/// Standard LayerNorm with optional affine parameters.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Option<Tensor>,
    bias: Option<Tensor>,
}

impl LayerNorm {
    /// Constructs a LayerNorm with explicit scale and bias parameters.
    pub fn new(weight: Tensor, bias: Tensor, mut config: NormConfig) -> Result<Self> {
        config.elementwise_affine = true;
        Self::build(config, Some(weight), Some(bias))
    }

    /// Constructs a LayerNorm without affine parameters (scale = 1, bias = 0).
    pub fn without_affine(mut config: NormConfig) -> Result<Self> {
        config.elementwise_affine = false;
        Self::build(config, None, None)
    }

    /// Registers `{name}.weight` (ones) and `{name}.bias` (zeros) in `store`
    /// when the config asks for affine parameters.
    pub fn with_store(config: NormConfig, store: &mut ParamStore, name: &str) -> Result<Self> {
        if !config.elementwise_affine {
            return Self::without_affine(config);
        }
        let weight = store.constant(&format!("{name}.weight"), config.hidden_size, 1.0)?;
        let bias = store.constant(&format!("{name}.bias"), config.hidden_size, 0.0)?;
        Self::new(weight, bias, config)
    }

    fn build(config: NormConfig, weight: Option<Tensor>, bias: Option<Tensor>) -> Result<Self> {
        if config.hidden_size == 0 {
            return Err(Error::Msg("layer norm hidden size must be non-zero".into()));
        }
        if !config.elementwise_affine && (weight.is_some() || bias.is_some()) {
            return Err(Error::Msg(
                "non-affine norms must not include scale or bias parameters".into(),
            ));
        }
        for (label, param) in [("norm.weight", &weight), ("norm.bias", &bias)] {
            if let Some(param) = param {
                checks::expect_shape(label, param, &[config.hidden_size])?;
                checks::expect_dtype_in(label, param, &checks::FLOAT_DTYPES)?;
            }
        }
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    /// Normalises the last axis of a `(batch, seq, hidden)` tensor.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;

        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let mut normalized = centered
            .broadcast_div(&denom)?
            .to_dtype(policy.compute())?;

        if let Some(weight) = &self.weight {
            normalized = normalized.broadcast_mul(&weight.to_dtype(normalized.dtype())?)?;
        }
        if let Some(bias) = &self.bias {
            normalized = normalized.broadcast_add(&bias.to_dtype(normalized.dtype())?)?;
        }

        policy.cast_to_storage(&normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::ops;

    fn build_input(
        device: &Device,
        dtype: DType,
        batch: usize,
        seq: usize,
        hidden: usize,
    ) -> Result<Tensor> {
        let total = batch * seq * hidden;
        let data = (0..total)
            .map(|i| (i as f32 * 0.25_f32) - 1.5_f32)
            .collect::<Vec<_>>();
        Tensor::from_vec(data, (batch, seq, hidden), device)?.to_dtype(dtype)
    }

    fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()
    }

    #[test]
    fn layer_norm_matches_reference_across_dtypes() -> Result<()> {
        let device = Device::Cpu;
        let hidden = 4;
        let config = NormConfig::new(hidden);

        let weight_f32 = Tensor::from_vec(vec![1.0f32, 0.5, -0.25, 1.5], (hidden,), &device)?;
        let bias_f32 = Tensor::from_vec(vec![0.1f32, -0.2, 0.05, 0.0], (hidden,), &device)?;

        for &dtype in &[DType::F32, DType::F16, DType::BF16] {
            let input = build_input(&device, dtype, 2, 3, hidden)?;
            let weight = weight_f32.to_dtype(dtype)?;
            let bias = bias_f32.to_dtype(dtype)?;
            let layer = LayerNorm::new(weight.clone(), bias.clone(), config.clone())?;
            let policy = PrecisionPolicy::from_parameter_dtype(dtype);
            let output = layer.forward(&input, &policy)?;

            assert_eq!(output.dims(), input.dims());
            assert_eq!(output.dtype(), dtype);

            let reference = ops::layer_norm(&input, &weight, &bias, config.epsilon as f32)?;
            let tol = match dtype {
                DType::F16 => 1e-3,
                DType::BF16 => 1e-2,
                _ => 5e-4,
            };
            let diff = max_diff(&output, &reference)?;
            assert!(diff < tol, "max diff {} for dtype {:?}", diff, dtype);
        }

        Ok(())
    }

    #[test]
    fn store_backed_norm_equals_unit_affine() -> Result<()> {
        let device = Device::Cpu;
        let hidden = 8;
        let mut store = ParamStore::new(0, DType::F32, &device);
        let stored = LayerNorm::with_store(NormConfig::new(hidden), &mut store, "ln")?;
        let bare = LayerNorm::without_affine(NormConfig::new(hidden))?;
        assert_eq!(store.len(), 2);

        let input = build_input(&device, DType::F32, 1, 5, hidden)?;
        let policy = PrecisionPolicy::default();
        let diff = max_diff(&stored.forward(&input, &policy)?, &bare.forward(&input, &policy)?)?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn layer_norm_handles_edge_shapes() -> Result<()> {
        let device = Device::Cpu;
        let shapes = [(1, 1, 1), (2, 1, 1), (1, 64, 8), (2, 3, 256)];
        for &(batch, seq, hidden) in &shapes {
            let config = NormConfig::new(hidden);
            let input = build_input(&device, DType::F32, batch, seq, hidden)?;
            let weight = Tensor::ones((hidden,), DType::F32, &device)?;
            let bias = Tensor::zeros((hidden,), DType::F32, &device)?;
            let layer = LayerNorm::new(weight.clone(), bias.clone(), config.clone())?;
            let output = layer.forward(&input, &PrecisionPolicy::default())?;
            let reference = ops::layer_norm(&input, &weight, &bias, config.epsilon as f32)?;
            let diff = max_diff(&output, &reference)?;
            assert!(diff < 5e-4, "shape {:?} diff {}", (batch, seq, hidden), diff);
        }
        Ok(())
    }

    #[test]
    fn wrong_hidden_size_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let layer = LayerNorm::without_affine(NormConfig::new(4))?;
        let input = build_input(&device, DType::F32, 1, 2, 3)?;
        assert!(layer.forward(&input, &PrecisionPolicy::default()).is_err());
        Ok(())
    }
}
