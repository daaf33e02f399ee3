//! Exponential smoothing transformer for multivariate time-series forecasting.
//!
//! The operators live in [`attention`], the assembly in [`model`]. This crate
//! re-exports both and holds the helpers behind the `etsformer` binary.

pub use attention;
pub use layers;
pub use model;

pub use model::{EtsFormer, ModelConfig};

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{Device, Tensor};
use serde::Serialize;
use serde_json::Value;

/// Applies `key=value` overrides to the serialised form of `config`.
///
/// Keys may be dotted paths into nested tables. Values are parsed as JSON
/// first (`4`, `0.1`, `true`) and fall back to plain strings (`naive`).
pub fn apply_overrides(config: &ModelConfig, overrides: &[String]) -> Result<ModelConfig> {
    if overrides.is_empty() {
        return Ok(config.clone());
    }
    let mut tree = serde_json::to_value(config)?;
    for item in overrides {
        let (key, raw) = item
            .split_once('=')
            .ok_or_else(|| anyhow!("override '{item}' must look like key=value"))?;
        let value = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        let mut slot = &mut tree;
        for part in key.split('.') {
            let Some(table) = slot.as_object_mut() else {
                bail!("override '{key}': '{part}' is not inside a table");
            };
            slot = table
                .get_mut(part)
                .ok_or_else(|| anyhow!("override '{key}': unknown field '{part}'"))?;
        }
        log::debug!("override {key}={value}");
        *slot = value;
    }
    let updated: ModelConfig =
        serde_json::from_value(tree).context("overrides produced an invalid config")?;
    updated.validate()?;
    Ok(updated)
}

/// Deterministic `[batch, len, features]` series: a trend plus one seasonal
/// cycle of period 8 per feature, phase-shifted by batch and feature index.
pub fn synthetic_series(
    batch: usize,
    len: usize,
    features: usize,
    device: &Device,
) -> Result<Tensor> {
    let mut data = Vec::with_capacity(batch * len * features);
    for b in 0..batch {
        for t in 0..len {
            for f in 0..features {
                let phase = (b + f) as f32 * 0.5;
                let season = (std::f32::consts::TAU * t as f32 / 8.0 + phase).sin();
                data.push(0.05 * t as f32 + season);
            }
        }
    }
    Ok(Tensor::from_vec(data, (batch, len, features), device)?)
}

/// JSON payload printed by `etsformer forecast`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastReport {
    pub strategy: String,
    pub steps: usize,
    /// `[batch][step][feature]`
    pub forecast: Vec<Vec<Vec<f32>>>,
}

impl ForecastReport {
    pub fn new(config: &ModelConfig, steps: usize, forecast: &Tensor) -> Result<Self> {
        let forecast = forecast
            .to_dtype(candle_core::DType::F32)?
            .to_vec3::<f32>()
            .context("forecast must be [batch, steps, features]")?;
        Ok(Self {
            strategy: config.strategy.to_string(),
            steps,
            forecast,
        })
    }
}

/// Largest absolute difference between two tensors of the same shape.
pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok(a.sub(b)?
        .abs()?
        .max_all()?
        .to_dtype(candle_core::DType::F32)?
        .to_vec0::<f32>()?)
}
