//! Frequency attention: keep the strongest spectral components of each series.
//!
//! For every `(batch, channel)` series of length `n` the real spectrum has
//! `n / 2 + 1` bins. The `top_k` bins with the largest amplitude survive, the
//! rest are zeroed, and the inverse transform returns a series of length
//! exactly `n`. Amplitude dropout (training only) perturbs the ranking but not
//! the kept coefficients.
//!
//! For a fixed selection the filter is a real symmetric projection, so its
//! gradient is the same filter applied to the incoming gradient.

use std::sync::OnceLock;

use candle_core::{bail, CpuStorage, Layout, Result as CandleResult, Shape, Tensor};
use layers::{dtypes::TRANSFORM_DTYPE, Dropout};
use rustfft::num_complex::Complex;

use crate::conv::fft::ensure_cpu;
use crate::core::{AttentionError, FrequencyConfig};
use crate::spectral::{self, TransformPair};

/// Indices of the `k` largest amplitudes, strongest first.
///
/// Ties resolve to the lower index. `k` larger than the input keeps everything.
pub fn select_top_k(amplitudes: &[f32], k: usize) -> Vec<usize> {
    let mut order = (0..amplitudes.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| amplitudes[b].total_cmp(&amplitudes[a]));
    order.truncate(k);
    order
}

/// Amplitudes of bins `0..=len / 2` for each `len`-sized row.
fn half_spectrum_amplitudes(data: &[f32], len: usize) -> Vec<f32> {
    let bins = len / 2 + 1;
    let transforms = TransformPair::new(len);
    let mut buffer = vec![Complex::new(0.0, 0.0); len];
    let mut amplitudes = Vec::with_capacity(data.len() / len * bins);
    for (lo, hi) in spectral::row_pairs(data, len) {
        spectral::load_pair(&mut buffer, lo, hi);
        transforms.forward(&mut buffer);
        let spectra = (0..bins)
            .map(|k| spectral::unpack_pair(&buffer, k))
            .collect::<Vec<_>>();
        amplitudes.extend(spectra.iter().map(|(a, _)| a.norm()));
        if !hi.is_empty() {
            amplitudes.extend(spectra.iter().map(|(_, b)| b.norm()));
        }
    }
    amplitudes
}

/// Zeroes every spectrum bin not flagged in `keep` (`rows x bins`) and
/// transforms back, row by row over a `(rows, len)` tensor.
struct SpectralMaskOp {
    keep: Vec<bool>,
    bins: usize,
    len: usize,
}

impl SpectralMaskOp {
    fn filter(&self, data: &[f32]) -> Vec<f32> {
        let (len, bins) = (self.len, self.bins);
        let transforms = TransformPair::new(len);
        let scale = 1.0 / len as f32;
        let zero = Complex::new(0.0, 0.0);
        let mut packed = vec![zero; len];
        let mut masked = vec![zero; len];
        let mut output = vec![0.0f32; data.len()];

        let rows = spectral::row_pairs(data, len).zip(self.keep.chunks(2 * bins));
        for (((lo, hi), keep), out) in rows.zip(output.chunks_mut(2 * len)) {
            let (keep_lo, keep_hi) = keep.split_at(bins);
            spectral::load_pair(&mut packed, lo, hi);
            transforms.forward(&mut packed);
            // Bin k and its mirror n - k share one flag.
            for (k, slot) in masked.iter_mut().enumerate() {
                let bin = k.min(len - k);
                let (a, b) = spectral::unpack_pair(&packed, k);
                let a = if keep_lo[bin] { a } else { zero };
                let b = if keep_hi.get(bin).copied().unwrap_or(false) { b } else { zero };
                *slot = a + Complex::<f32>::i() * b;
            }
            transforms.inverse(&mut masked);

            let (out_lo, out_hi) = out.split_at_mut(len);
            for (slot, value) in out_lo.iter_mut().zip(&masked) {
                *slot = value.re * scale;
            }
            for (slot, value) in out_hi.iter_mut().zip(&masked) {
                *slot = value.im * scale;
            }
        }
        output
    }
}

impl candle_core::CustomOp1 for SpectralMaskOp {
    fn name(&self) -> &'static str {
        "spectral-top-k"
    }

    fn cpu_fwd(&self, storage: &CpuStorage, layout: &Layout) -> CandleResult<(CpuStorage, Shape)> {
        let data = spectral::contiguous_f32("spectral-top-k", storage, layout)?;
        if data.len() % self.len != 0 || data.len() / self.len * self.bins != self.keep.len() {
            bail!(
                "spectral-top-k: input {:?} does not match {} flags of {} bins",
                layout.dims(),
                self.keep.len(),
                self.bins
            );
        }
        Ok((CpuStorage::F32(self.filter(data)), layout.shape().clone()))
    }

    fn bwd(&self, _arg: &Tensor, _res: &Tensor, grad_res: &Tensor) -> CandleResult<Option<Tensor>> {
        Ok(Some(grad_res.contiguous()?.apply_op1_no_bwd(self)?))
    }
}

/// Top-K spectral filter over `[batch, time, channels]` tensors.
#[derive(Debug)]
pub struct FrequencyAttention {
    config: FrequencyConfig,
    dropout: Dropout,
    first_call: OnceLock<()>,
}

impl FrequencyAttention {
    pub fn new(config: FrequencyConfig, seed: u64) -> Result<Self, AttentionError> {
        if config.top_k == 0 {
            return Err(AttentionError::config("frequency top_k must be at least 1"));
        }
        let dropout = Dropout::new(config.dropout, seed)
            .map_err(|err| AttentionError::config(err.to_string()))?;
        Ok(Self {
            config,
            dropout,
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &FrequencyConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        ensure_cpu("frequency attention input", x)?;
        let (batch, len, channels) = x.dims3().map_err(|_| {
            AttentionError::shape(format!(
                "frequency attention expects [batch, time, channels], got {:?}",
                x.dims()
            ))
        })?;
        let bins = len / 2 + 1;
        if len == 0 || self.config.top_k > bins {
            return Err(AttentionError::shape(format!(
                "top_k {} needs between 1 and {bins} bins, series length is {len}",
                self.config.top_k
            )));
        }
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::frequency init top_k={} dropout={}",
                self.config.top_k,
                self.dropout.probability()
            );
        }

        let rows = x
            .to_dtype(TRANSFORM_DTYPE)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch * channels, len))?;
        let data = rows.flatten_all()?.to_vec1::<f32>()?;
        let mut amplitudes = half_spectrum_amplitudes(&data, len);
        if let Some(mask) = self.dropout.sample_mask(amplitudes.len())? {
            for (amp, scale) in amplitudes.iter_mut().zip(mask) {
                *amp *= scale;
            }
        }

        let mut keep = vec![false; amplitudes.len()];
        for (row_amps, row_keep) in amplitudes.chunks_exact(bins).zip(keep.chunks_exact_mut(bins)) {
            for bin in select_top_k(row_amps, self.config.top_k) {
                row_keep[bin] = true;
            }
        }
        log::debug!(
            "frequency attention series={} len={len} bins={bins} top_k={}",
            batch * channels,
            self.config.top_k
        );

        let filtered = rows.apply_op1(SpectralMaskOp { keep, bins, len })?;
        Ok(filtered
            .reshape((batch, channels, len))?
            .transpose(1, 2)?
            .contiguous()?
            .to_dtype(x.dtype())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use std::f32::consts::PI;

    fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32, AttentionError> {
        Ok(a.sub(b)?.abs()?.max_all()?.to_vec0::<f32>()?)
    }

    fn attention(top_k: usize) -> FrequencyAttention {
        FrequencyAttention::new(FrequencyConfig::new(top_k), 0).expect("frequency attention")
    }

    #[test]
    fn top_k_prefers_lower_index_on_ties() {
        assert_eq!(select_top_k(&[1.0, 3.0, 3.0, 2.0], 2), vec![1, 2]);
        assert_eq!(select_top_k(&[2.0, 2.0, 2.0], 2), vec![0, 1]);
        assert_eq!(select_top_k(&[0.5, 4.0, 1.0], 1), vec![1]);
        assert_eq!(select_top_k(&[1.0], 3), vec![0]);
    }

    #[test]
    fn preserves_length_for_odd_and_even_series() -> Result<(), AttentionError> {
        for len in [5usize, 8, 9, 16] {
            let x = Tensor::randn(0f32, 1.0, (2, len, 3), &Device::Cpu)?;
            let out = attention(2).forward(&x)?;
            assert_eq!(out.dims(), &[2, len, 3]);
        }
        Ok(())
    }

    #[test]
    fn filtering_is_idempotent() -> Result<(), AttentionError> {
        for len in [15usize, 16] {
            let attn = attention(3);
            let x = Tensor::randn(0f32, 1.0, (2, len, 4), &Device::Cpu)?;
            let once = attn.forward(&x)?;
            let twice = attn.forward(&once)?;
            assert!(max_diff(&once, &twice)? < 1e-4, "len {len}");
        }
        Ok(())
    }

    #[test]
    fn keeping_every_bin_reconstructs_the_input() -> Result<(), AttentionError> {
        for len in [7usize, 10] {
            let x = Tensor::randn(0f32, 1.0, (1, len, 2), &Device::Cpu)?;
            let out = attention(len / 2 + 1).forward(&x)?;
            assert!(max_diff(&out, &x)? < 1e-4);
        }
        Ok(())
    }

    #[test]
    fn dominant_seasonality_survives_alone() -> Result<(), AttentionError> {
        let len = 16;
        let season = (0..len)
            .map(|t| (2.0 * PI * 2.0 * t as f32 / len as f32).cos())
            .collect::<Vec<_>>();
        let noisy = season
            .iter()
            .enumerate()
            .map(|(t, s)| s + 0.1 + 0.05 * (2.0 * PI * 5.0 * t as f32 / len as f32).sin())
            .collect::<Vec<_>>();
        let x = Tensor::from_vec(noisy, (1, len, 1), &Device::Cpu)?;
        let expected = Tensor::from_vec(season, (1, len, 1), &Device::Cpu)?;
        let out = attention(1).forward(&x)?;
        assert!(max_diff(&out, &expected)? < 1e-4);
        Ok(())
    }

    #[test]
    fn series_sharing_a_transform_keep_their_own_selection() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let len = 12;
        let wave = |freq: f32, amp: f32| {
            (0..len)
                .map(|t| amp * (2.0 * PI * freq * t as f32 / len as f32).cos())
                .collect::<Vec<_>>()
        };
        // Three channels: a strong slow wave, a weak fast one, and a mix.
        let channels = [
            wave(1.0, 5.0),
            wave(4.0, 0.2),
            wave(2.0, 1.0)
                .iter()
                .zip(wave(3.0, 0.4))
                .map(|(a, b)| a + b)
                .collect(),
        ];
        let columns = channels
            .iter()
            .map(|c| Tensor::from_vec(c.clone(), (1, len, 1), &device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let x = Tensor::cat(&columns, 2)?;
        let attn = attention(1);
        let together = attn.forward(&x)?;
        for (c, column) in columns.iter().enumerate() {
            let alone = attn.forward(column)?;
            let got = together.narrow(2, c, 1)?;
            assert!(max_diff(&got, &alone)? < 1e-5, "channel {c}");
        }
        let mixed = Tensor::from_vec(wave(2.0, 1.0), (1, len, 1), &device)?;
        assert!(max_diff(&together.narrow(2, 2, 1)?, &mixed)? < 1e-4);
        Ok(())
    }

    #[test]
    fn top_k_bounds_are_enforced() -> Result<(), AttentionError> {
        assert!(matches!(
            FrequencyAttention::new(FrequencyConfig::new(0), 0),
            Err(AttentionError::InvalidConfig { .. })
        ));
        let x = Tensor::zeros((1, 6, 1), DType::F32, &Device::Cpu)?;
        assert!(attention(4).forward(&x).is_ok());
        assert!(matches!(
            attention(5).forward(&x),
            Err(AttentionError::InvalidShape { .. })
        ));
        Ok(())
    }

    #[test]
    fn gradient_is_the_filtered_upstream_gradient() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let len = 8;
        let keep = vec![true, false, true, false, false, false, true, true, false, false];
        let op = || SpectralMaskOp {
            keep: keep.clone(),
            bins: len / 2 + 1,
            len,
        };
        let x = Var::from_tensor(&Tensor::randn(0f32, 1.0, (2, len), &device)?)?;
        let upstream = Tensor::randn(0f32, 1.0, (2, len), &device)?;
        let loss = x.as_tensor().apply_op1(op())?.mul(&upstream)?.sum_all()?;
        let grads = loss.backward()?;
        let grad = grads.get(x.as_tensor()).expect("input gradient");
        let expected = upstream.apply_op1_no_bwd(&op())?;
        assert!(max_diff(grad, &expected)? < 1e-5);
        Ok(())
    }

    #[test]
    fn amplitude_dropout_is_silent_in_evaluation() -> Result<(), AttentionError> {
        let mut config = FrequencyConfig::new(2);
        config.dropout = 0.5;
        let attn = FrequencyAttention::new(config, 4)?;
        attn.set_training(false);
        let x = Tensor::randn(0f32, 1.0, (1, 12, 2), &Device::Cpu)?;
        let a = attn.forward(&x)?;
        let b = attn.forward(&x)?;
        assert_eq!(max_diff(&a, &b)?, 0.0);
        Ok(())
    }
}
