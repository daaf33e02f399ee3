//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking. Every helper takes a
//! `context` label that prefixes the message (e.g. `"linear.weight"`).

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {:?}, got {:?}",
            expected, actual
        )))
    }
}

/// Ensures a tensor has the requested rank.
pub fn expect_rank(context: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
///
/// Zero-sized batch or sequence axes are rejected as well.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [batch, seq, actual] if *actual == hidden && *batch > 0 && *seq > 0 => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout with non-zero batch/seq, got {:?}",
            dims
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(context: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

/// Checks two tensors share a dtype.
pub fn expect_same_dtype(
    lhs_context: &str,
    lhs: &Tensor,
    rhs_context: &str,
    rhs: &Tensor,
) -> Result<()> {
    if lhs.dtype() == rhs.dtype() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{lhs_context} has dtype {:?} but {rhs_context} has {:?}",
            lhs.dtype(),
            rhs.dtype()
        )))
    }
}

/// Floating dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: [DType; 3] = [DType::F16, DType::BF16, DType::F32];

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn shape_and_rank_mismatches_are_reported() -> Result<()> {
        let tensor = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu)?;
        expect_shape("t", &tensor, &[2, 3, 4])?;
        expect_rank("t", &tensor, 3)?;
        assert!(expect_shape("t", &tensor, &[2, 4, 3]).is_err());
        let err = expect_rank("probe", &tensor, 2).unwrap_err();
        assert!(err.to_string().contains("probe"));
        Ok(())
    }

    #[test]
    fn batch_seq_hidden_rejects_empty_axes() -> Result<()> {
        let ok = Tensor::zeros((1, 5, 8), DType::F32, &Device::Cpu)?;
        expect_batch_seq_hidden("x", &ok, 8)?;
        let empty = Tensor::zeros((1, 0, 8), DType::F32, &Device::Cpu)?;
        assert!(expect_batch_seq_hidden("x", &empty, 8).is_err());
        assert!(expect_batch_seq_hidden("x", &ok, 4).is_err());
        Ok(())
    }

    #[test]
    fn dtype_checks() -> Result<()> {
        let a = Tensor::zeros(3, DType::F32, &Device::Cpu)?;
        let b = Tensor::zeros(3, DType::U32, &Device::Cpu)?;
        expect_dtype_in("a", &a, &FLOAT_DTYPES)?;
        assert!(expect_dtype_in("b", &b, &FLOAT_DTYPES).is_err());
        assert!(expect_same_dtype("a", &a, "b", &b).is_err());
        Ok(())
    }
}
