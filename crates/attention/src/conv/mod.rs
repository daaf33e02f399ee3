//! Causal convolution strategies.
//!
//! [`FftConvolver`] evaluates the convolution in the transform domain and is
//! the default. [`NaiveConvolver`] builds the full lag matrix and serves as the
//! reference implementation. Both validate inputs through [`ConvGeometry`].

pub mod fft;
pub mod naive;

use candle_core::{DType, Tensor, D};

use crate::core::{AttentionError, CausalConvolver, ConvolutionStrategy};

pub use fft::{conv1d_fft, FftConvolver};
pub use naive::NaiveConvolver;

/// Validated layout of a `(signal, kernel)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConvGeometry {
    /// Leading dims of the signal (everything before `[N, C]`).
    pub lead: Vec<usize>,
    /// Sequence length `N`.
    pub len: usize,
    /// Channel count `C`.
    pub channels: usize,
    /// Kernel length `M <= N`.
    pub kernel_len: usize,
}

impl ConvGeometry {
    pub(crate) fn of(signal: &Tensor, kernel: &Tensor) -> Result<Self, AttentionError> {
        for (label, tensor) in [("signal", signal), ("kernel", kernel)] {
            if !matches!(tensor.dtype(), DType::F32 | DType::F16 | DType::BF16 | DType::F64) {
                return Err(AttentionError::UnsupportedDType {
                    requested: format!("{label} dtype {:?}", tensor.dtype()),
                });
            }
        }
        let dims = signal.dims();
        let kdims = kernel.dims();
        if dims.len() < 2 {
            return Err(AttentionError::shape(format!(
                "signal must be [..., time, channels], got {dims:?}"
            )));
        }
        let Some((&kernel_len, klead)) = kdims.split_last() else {
            return Err(AttentionError::shape("kernel must have at least one dim"));
        };
        let (lead, tail) = dims.split_at(dims.len() - 2);
        let (len, channels) = (tail[0], tail[1]);
        if len == 0 || kernel_len == 0 {
            return Err(AttentionError::shape(format!(
                "empty time axis: signal {dims:?}, kernel {kdims:?}"
            )));
        }
        if kernel_len > len {
            return Err(AttentionError::shape(format!(
                "kernel length {kernel_len} exceeds signal length {len}"
            )));
        }
        let broadcastable = klead.len() <= lead.len()
            && klead
                .iter()
                .rev()
                .zip(lead.iter().rev())
                .all(|(k, s)| *k == 1 || k == s);
        if !broadcastable {
            return Err(AttentionError::shape(format!(
                "kernel leading dims {klead:?} do not broadcast against signal leading dims {lead:?}"
            )));
        }
        Ok(Self {
            lead: lead.to_vec(),
            len,
            channels,
            kernel_len,
        })
    }

    /// Number of independent `(lead, channel)` series.
    pub(crate) fn rows(&self) -> usize {
        self.lead.iter().product::<usize>() * self.channels
    }

    /// Zero-extends `kernel` at its tail to the signal length.
    pub(crate) fn pad_kernel(&self, kernel: &Tensor) -> Result<Tensor, AttentionError> {
        if self.kernel_len == self.len {
            return Ok(kernel.clone());
        }
        Ok(kernel.pad_with_zeros(D::Minus1, 0, self.len - self.kernel_len)?)
    }
}

/// Builds the convolver selected by `strategy`.
pub fn convolver(
    strategy: ConvolutionStrategy,
    naive_max_seq_len: usize,
    dropout: f32,
    seed: u64,
) -> Result<Box<dyn CausalConvolver>, AttentionError> {
    log::debug!("causal convolution strategy={strategy}");
    match strategy {
        ConvolutionStrategy::Fft => Ok(Box::new(FftConvolver::new())),
        ConvolutionStrategy::Naive => Ok(Box::new(NaiveConvolver::new(
            naive_max_seq_len,
            dropout,
            seed,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn zeros(dims: &[usize]) -> Tensor {
        Tensor::zeros(dims, DType::F32, &Device::Cpu).expect("zeros")
    }

    #[test]
    fn geometry_accepts_right_aligned_broadcast() -> Result<(), AttentionError> {
        let geo = ConvGeometry::of(&zeros(&[2, 3, 10, 4]), &zeros(&[3, 6]))?;
        assert_eq!(geo.lead, vec![2, 3]);
        assert_eq!((geo.len, geo.channels, geo.kernel_len), (10, 4, 6));
        assert_eq!(geo.rows(), 24);

        ConvGeometry::of(&zeros(&[2, 10, 1]), &zeros(&[1, 10]))?;
        ConvGeometry::of(&zeros(&[10, 1]), &zeros(&[10]))?;
        Ok(())
    }

    #[test]
    fn geometry_rejects_bad_pairs() {
        assert!(ConvGeometry::of(&zeros(&[2, 4, 1]), &zeros(&[5])).is_err());
        assert!(ConvGeometry::of(&zeros(&[2, 3, 4, 1]), &zeros(&[2, 4])).is_err());
        assert!(ConvGeometry::of(&zeros(&[4]), &zeros(&[4])).is_err());
        assert!(ConvGeometry::of(&zeros(&[1, 0, 2]), &zeros(&[1])).is_err());
    }

    #[test]
    fn factory_honours_strategy() -> Result<(), AttentionError> {
        assert_eq!(convolver(ConvolutionStrategy::Fft, 16, 0.0, 0)?.name(), "fft");
        assert_eq!(convolver(ConvolutionStrategy::Naive, 16, 0.0, 0)?.name(), "naive");
        assert!(convolver(ConvolutionStrategy::Naive, 16, 1.5, 0).is_err());
        Ok(())
    }
}
