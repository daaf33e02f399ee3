//! Lag indexing and causal masking for the materialised convolution.
//!
//! Row `t` of the lag matrix holds the kernel weight applied to source step
//! `s`. Reading the kernel through [`gather_index`] puts `w[N - 1 - (t - s)]`
//! at every causal position; the entries above the diagonal wrap around and
//! are zeroed by [`causal_keep_mask`].

use candle_core::{DType, Device, Result, Tensor};

/// Kernel index used for source step `s` at output step `t`: `(s - t - 1) mod n`.
pub fn gather_index(source: usize, target: usize, n: usize) -> usize {
    debug_assert!(source < n && target < n);
    (source + n - target - 1) % n
}

/// `[n, n]` `u32` tensor with `index[t][s] = gather_index(s, t, n)`.
pub fn lag_index(n: usize, device: &Device) -> Result<Tensor> {
    let data = (0..n)
        .flat_map(|t| (0..n).map(move |s| gather_index(s, t, n) as u32))
        .collect::<Vec<_>>();
    Tensor::from_vec(data, (n, n), device)
}

/// Lower-triangular `[n, n]` mask of ones (`s <= t`) in `dtype`.
pub fn causal_keep_mask(n: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    Tensor::tril2(n, dtype, device)
}
