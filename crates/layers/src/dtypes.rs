//! Where tensors are stored and where their arithmetic happens.
//!
//! Parameters may be stored as `f16`/`bf16`; projections and activations then
//! run in `f32`. Layer-norm statistics and the spectral transforms always run
//! in `f32` whatever the storage dtype.

use candle_core::{DType, Result, Tensor};

/// Dtype consumed by the host FFT kernels.
pub const TRANSFORM_DTYPE: DType = DType::F32;

/// Dtype of normalisation statistics.
pub const STATISTICS_DTYPE: DType = DType::F32;

/// Storage and compute dtypes of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    /// Half-precision storage computes in `f32`; anything else computes in place.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self { storage, compute }
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn is_mixed(&self) -> bool {
        self.storage != self.compute
    }

    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.compute)
    }

    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, STATISTICS_DTYPE)
    }

    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.storage)
    }
}

impl Default for PrecisionPolicy {
    fn default() -> Self {
        Self::from_parameter_dtype(DType::F32)
    }
}

fn cast(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
