//! Causal convolution in the transform domain.
//!
//! Each `(lead, channel)` series `x` of length `N` and its kernel `w` are zero
//! padded to `L = next_fast_len(2N - 1)` and transformed. The product
//! `X * conj(W)` is the circular cross-correlation of the two; reading it from
//! index `L - N + 1` onwards yields
//!
//! ```text
//! out[t] = sum_{s <= t} w[N - 1 - (t - s)] * x[s]
//! ```
//!
//! which is exactly the lower-triangular lag matrix the naive path builds.
//! The padding to `2N - 1` keeps the circular wrap out of the kept window.

use std::sync::OnceLock;

use candle_core::{bail, CpuStorage, Layout, Result as CandleResult, Shape, Tensor};
use layers::dtypes::TRANSFORM_DTYPE;
use rustfft::num_complex::Complex;

use super::ConvGeometry;
use crate::core::{AttentionError, CausalConvolver};
use crate::spectral::{self, next_fast_len, TransformPair};

/// Row-wise causal convolution of `signal` and `kernel`, both `rows x len`.
///
/// Consecutive rows share their transforms: two signal rows go through one
/// forward pass, their two kernels through another, and both products come
/// back through a single inverse.
pub(crate) fn causal_rows(signal: &[f32], kernel: &[f32], len: usize) -> Vec<f32> {
    let fast_len = next_fast_len(2 * len - 1);
    let transforms = TransformPair::new(fast_len);
    let scale = 1.0 / fast_len as f32;
    let shift = fast_len - len + 1;

    let zero = Complex::new(0.0, 0.0);
    let mut x_buf = vec![zero; fast_len];
    let mut w_buf = vec![zero; fast_len];
    let mut products = vec![zero; fast_len];
    let mut output = vec![0.0f32; signal.len()];

    let pairs = spectral::row_pairs(signal, len).zip(spectral::row_pairs(kernel, len));
    for (((x_lo, x_hi), (w_lo, w_hi)), out) in pairs.zip(output.chunks_mut(2 * len)) {
        spectral::load_pair(&mut x_buf, x_lo, x_hi);
        spectral::load_pair(&mut w_buf, w_lo, w_hi);
        transforms.forward(&mut x_buf);
        transforms.forward(&mut w_buf);
        for (k, product) in products.iter_mut().enumerate() {
            let (x_lo, x_hi) = spectral::unpack_pair(&x_buf, k);
            let (w_lo, w_hi) = spectral::unpack_pair(&w_buf, k);
            *product = x_lo * w_lo.conj() + Complex::<f32>::i() * (x_hi * w_hi.conj());
        }
        transforms.inverse(&mut products);

        let (out_lo, out_hi) = out.split_at_mut(len);
        for (t, slot) in out_lo.iter_mut().enumerate() {
            *slot = products[(shift + t) % fast_len].re * scale;
        }
        for (t, slot) in out_hi.iter_mut().enumerate() {
            *slot = products[(shift + t) % fast_len].im * scale;
        }
    }
    output
}

/// Differentiable row-wise causal convolution over `(rows, len)` tensors.
struct CausalFftConv {
    len: usize,
}

impl candle_core::CustomOp2 for CausalFftConv {
    fn name(&self) -> &'static str {
        "causal-fft-conv"
    }

    fn cpu_fwd(
        &self,
        s1: &CpuStorage,
        l1: &Layout,
        s2: &CpuStorage,
        l2: &Layout,
    ) -> CandleResult<(CpuStorage, Shape)> {
        let signal = spectral::contiguous_f32("causal-fft-conv signal", s1, l1)?;
        let kernel = spectral::contiguous_f32("causal-fft-conv kernel", s2, l2)?;
        if signal.len() != kernel.len() || signal.len() % self.len != 0 {
            bail!(
                "causal-fft-conv: signal {:?} and kernel {:?} must both be rows x {}",
                l1.dims(),
                l2.dims(),
                self.len
            );
        }
        let output = causal_rows(signal, kernel, self.len);
        Ok((CpuStorage::F32(output), l1.shape().clone()))
    }

    fn bwd(
        &self,
        signal: &Tensor,
        kernel: &Tensor,
        _res: &Tensor,
        grad_res: &Tensor,
    ) -> CandleResult<(Option<Tensor>, Option<Tensor>)> {
        let len = self.len;
        let x = signal.flatten_all()?.to_vec1::<f32>()?;
        let w = kernel.flatten_all()?.to_vec1::<f32>()?;
        let g = grad_res.flatten_all()?.to_vec1::<f32>()?;

        // The transpose of the lag matrix is the same matrix read backwards in time.
        let grad_signal = spectral::reverse_rows(
            &causal_rows(&spectral::reverse_rows(&g, len), &w, len),
            len,
        );
        let grad_kernel = causal_rows(&x, &g, len);

        Ok((
            Some(Tensor::from_vec(grad_signal, signal.shape().clone(), signal.device())?),
            Some(Tensor::from_vec(grad_kernel, kernel.shape().clone(), kernel.device())?),
        ))
    }
}

pub(crate) fn ensure_cpu(label: &str, tensor: &Tensor) -> Result<(), AttentionError> {
    if tensor.device().is_cpu() {
        Ok(())
    } else {
        log::debug!("{label} rejected on {:?}", tensor.device().location());
        Err(AttentionError::UnsupportedDevice {
            location: tensor.device().location(),
        })
    }
}

/// Causal convolution of `signal` (`[..., N, C]`) with `kernel` (`[..., M]`)
/// along dim `-2`.
///
/// The kernel is shared across the channel axis and broadcast right-aligned
/// against the leading dims of the signal. The transform runs on host `f32`
/// buffers; the result is cast back to the signal dtype. Gradients flow to
/// both inputs.
pub fn conv1d_fft(signal: &Tensor, kernel: &Tensor) -> Result<Tensor, AttentionError> {
    ensure_cpu("conv1d_fft signal", signal)?;
    ensure_cpu("conv1d_fft kernel", kernel)?;
    let geometry = ConvGeometry::of(signal, kernel)?;
    let (len, channels, rows) = (geometry.len, geometry.channels, geometry.rows());
    let rank = signal.rank();
    log::debug!(
        "conv1d_fft rows={rows} len={len} transform_len={}",
        next_fast_len(2 * len - 1)
    );

    let series = signal
        .to_dtype(TRANSFORM_DTYPE)?
        .transpose(rank - 2, rank - 1)?
        .contiguous()?
        .reshape((rows, len))?;

    let mut row_shape = geometry.lead.clone();
    row_shape.extend([channels, len]);
    let weights = geometry
        .pad_kernel(&kernel.to_dtype(TRANSFORM_DTYPE)?)?
        .unsqueeze(kernel.rank() - 1)?
        .broadcast_as(row_shape.as_slice())?
        .contiguous()?
        .reshape((rows, len))?;

    let output = series.apply_op2(&weights, CausalFftConv { len })?;
    Ok(output
        .reshape(row_shape)?
        .transpose(rank - 2, rank - 1)?
        .contiguous()?
        .to_dtype(signal.dtype())?)
}

/// [`CausalConvolver`] backed by [`conv1d_fft`].
#[derive(Debug, Default)]
pub struct FftConvolver {
    first_call: OnceLock<()>,
}

impl FftConvolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CausalConvolver for FftConvolver {
    fn name(&self) -> &'static str {
        "fft"
    }

    fn convolve(&self, signal: &Tensor, kernel: &Tensor) -> Result<Tensor, AttentionError> {
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::conv init strategy=fft signal={:?} kernel={:?}",
                signal.dims(),
                kernel.dims()
            );
        }
        conv1d_fft(signal, kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};

    /// Direct evaluation of the closed form, `kernel` zero-extended to `n`.
    fn direct(signal: &[f32], kernel: &[f32], n: usize) -> Vec<f32> {
        let m = kernel.len();
        (0..n)
            .map(|t| {
                (0..=t)
                    .map(|s| {
                        let lag = n - 1 - (t - s);
                        if lag < m {
                            kernel[lag] * signal[s]
                        } else {
                            0.0
                        }
                    })
                    .sum()
            })
            .collect()
    }

    fn wave(len: usize, freq: f32) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * freq).sin() + 0.1 * i as f32).collect()
    }

    #[test]
    fn matches_direct_loop_for_many_lengths() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        for n in [1usize, 2, 3, 5, 8, 13, 31, 64] {
            for m in [1, n.div_ceil(2), n] {
                let x = wave(n, 0.37);
                let w: Vec<f32> = (0..m).map(|k| 0.5f32.powi((m - 1 - k) as i32)).collect();
                let signal = Tensor::from_vec(x.clone(), (n, 1), &device)?;
                let kernel = Tensor::from_vec(w.clone(), m, &device)?;
                let out = conv1d_fft(&signal, &kernel)?.flatten_all()?.to_vec1::<f32>()?;
                let expected = direct(&x, &w, n);
                for (t, (a, b)) in out.iter().zip(&expected).enumerate() {
                    assert!((a - b).abs() < 1e-4, "n={n} m={m} t={t}: {a} vs {b}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn kernel_broadcasts_over_batch_and_channels() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let (batch, heads, n, channels) = (2, 3, 9, 4);
        let signal = Tensor::randn(0f32, 1.0, (batch, heads, n, channels), &device)?;
        let kernel = Tensor::randn(0f32, 1.0, (heads, n), &device)?;
        let out = conv1d_fft(&signal, &kernel)?;
        assert_eq!(out.dims(), signal.dims());

        let w = kernel.to_vec2::<f32>()?;
        for b in 0..batch {
            for h in 0..heads {
                for c in 0..channels {
                    let x = signal.get(b)?.get(h)?.narrow(1, c, 1)?.flatten_all()?.to_vec1::<f32>()?;
                    let got = out.get(b)?.get(h)?.narrow(1, c, 1)?.flatten_all()?.to_vec1::<f32>()?;
                    let expected = direct(&x, &w[h], n);
                    for (a, e) in got.iter().zip(&expected) {
                        assert!((a - e).abs() < 1e-4);
                    }
                }
            }
        }
        Ok(())
    }

    #[test]
    fn rows_sharing_a_transform_stay_independent() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let n = 11;
        let scales = [1.0f32, 10.0, 0.5];
        let x = scales
            .iter()
            .enumerate()
            .flat_map(|(r, scale)| {
                wave(n, 0.3 + 0.2 * r as f32)
                    .into_iter()
                    .map(move |v| v * scale)
            })
            .collect::<Vec<_>>();
        let w = (0..3 * n).map(|i| ((i * 7 % 5) as f32 - 2.0) * 0.1).collect::<Vec<_>>();
        let signal = Tensor::from_vec(x.clone(), (3, n, 1), &device)?;
        let kernel = Tensor::from_vec(w.clone(), (3, n), &device)?;
        let out = conv1d_fft(&signal, &kernel)?.flatten_all()?.to_vec1::<f32>()?;
        for r in 0..3 {
            let rows = r * n..(r + 1) * n;
            let expected = direct(&x[rows.clone()], &w[rows.clone()], n);
            for (a, e) in out[rows].iter().zip(&expected) {
                assert!((a - e).abs() < 1e-3, "row {r}: {a} vs {e}");
            }
        }
        Ok(())
    }

    #[test]
    fn output_keeps_signal_dtype() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let signal = Tensor::randn(0f32, 1.0, (1, 6, 2), &device)?.to_dtype(DType::BF16)?;
        let kernel = Tensor::ones(6, DType::F32, &device)?;
        let out = conv1d_fft(&signal, &kernel)?;
        assert_eq!(out.dtype(), DType::BF16);
        assert_eq!(out.dims(), &[1, 6, 2]);
        Ok(())
    }

    #[test]
    fn long_kernel_is_rejected() {
        let device = Device::Cpu;
        let signal = Tensor::zeros((4, 1), DType::F32, &device).expect("signal");
        let kernel = Tensor::zeros(5, DType::F32, &device).expect("kernel");
        let err = conv1d_fft(&signal, &kernel).unwrap_err();
        assert!(matches!(err, AttentionError::InvalidShape { .. }));
    }

    #[test]
    fn gradients_match_finite_differences() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let n = 7;
        let x0 = vec![1.0f32, 0.5, -0.3, 0.2, 0.0, -0.1, 0.4];
        let w0 = vec![0.05f32, -0.1, 0.2, 0.0, 0.3, -0.4, 0.8];
        let upstream = Tensor::from_vec(wave(n, 0.9), (n, 1), &device)?;

        let loss = |x: &Tensor, w: &Tensor| -> Result<Tensor, AttentionError> {
            Ok(conv1d_fft(x, w)?.mul(&upstream)?.sum_all()?)
        };

        let x = Var::from_vec(x0.clone(), (n, 1), &device)?;
        let w = Var::from_vec(w0.clone(), n, &device)?;
        let grads = loss(x.as_tensor(), w.as_tensor())?.backward()?;
        let grad_x = grads
            .get(x.as_tensor())
            .ok_or_else(|| AttentionError::shape("missing signal gradient"))?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let grad_w = grads
            .get(w.as_tensor())
            .ok_or_else(|| AttentionError::shape("missing kernel gradient"))?
            .to_vec1::<f32>()?;

        let eps = 1e-2f32;
        let numeric = |xs: &[f32], ws: &[f32]| -> Result<f32, AttentionError> {
            let x = Tensor::from_vec(xs.to_vec(), (n, 1), &device)?;
            let w = Tensor::from_vec(ws.to_vec(), n, &device)?;
            Ok(loss(&x, &w)?.to_scalar::<f32>()?)
        };
        for i in 0..n {
            let (mut plus, mut minus) = (x0.clone(), x0.clone());
            plus[i] += eps;
            minus[i] -= eps;
            let fd = (numeric(&plus, &w0)? - numeric(&minus, &w0)?) / (2.0 * eps);
            assert!((fd - grad_x[i]).abs() < 1e-2, "signal[{i}] {fd} vs {}", grad_x[i]);

            let (mut plus, mut minus) = (w0.clone(), w0.clone());
            plus[i] += eps;
            minus[i] -= eps;
            let fd = (numeric(&x0, &plus)? - numeric(&x0, &minus)?) / (2.0 * eps);
            assert!((fd - grad_w[i]).abs() < 1e-2, "kernel[{i}] {fd} vs {}", grad_w[i]);
        }
        Ok(())
    }

    #[test]
    fn broadcast_kernel_gradient_sums_over_rows() -> Result<(), AttentionError> {
        let device = Device::Cpu;
        let signal = Tensor::ones((3, 4, 2), DType::F32, &device)?;
        let w = Var::from_vec(vec![0.1f32, 0.2, 0.3, 0.4], 4, &device)?;
        let grads = conv1d_fft(&signal, w.as_tensor())?.sum_all()?.backward()?;
        let grad = grads
            .get(w.as_tensor())
            .ok_or_else(|| AttentionError::shape("missing kernel gradient"))?
            .to_vec1::<f32>()?;
        // Lag k contributes to k + 1 outputs per series, 6 series in total.
        for (k, g) in grad.iter().enumerate() {
            assert!((g - 6.0 * (k as f32 + 1.0)).abs() < 1e-3, "lag {k}: {g}");
        }
        Ok(())
    }
}
