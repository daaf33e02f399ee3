//! Host-side transform helpers shared by the FFT convolution and the
//! frequency filter.
//!
//! Plans are cached per thread. All buffers are complex `f32` and the inverse
//! transform is unscaled, so callers divide by the transform length themselves.
//!
//! Real rows travel in pairs: `a + i b` is transformed once and
//! [`unpack_pair`] recovers both spectra from conjugate symmetry. On the way
//! back `A' + i B'` inverts to `a' + i b'` whenever `A'` and `B'` are spectra of
//! real rows.

use std::{cell::RefCell, sync::Arc};

use candle_core::{bail, CpuStorage, Layout, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

thread_local! {
    static PLANNER: RefCell<FftPlanner<f32>> = RefCell::new(FftPlanner::new());
}

/// Forward and inverse plans for one transform length.
pub(crate) struct TransformPair {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl TransformPair {
    pub(crate) fn new(len: usize) -> Self {
        PLANNER.with(|planner| {
            let mut planner = planner.borrow_mut();
            Self {
                forward: planner.plan_fft_forward(len),
                inverse: planner.plan_fft_inverse(len),
            }
        })
    }

    pub(crate) fn forward(&self, buffer: &mut [Complex<f32>]) {
        self.forward.process(buffer);
    }

    pub(crate) fn inverse(&self, buffer: &mut [Complex<f32>]) {
        self.inverse.process(buffer);
    }
}

/// Loads `re` into the real and `im` into the imaginary parts of `buffer`,
/// zero padded. `im` may be shorter than `re`, or empty.
pub(crate) fn load_pair(buffer: &mut [Complex<f32>], re: &[f32], im: &[f32]) {
    buffer.fill(Complex::new(0.0, 0.0));
    for (slot, value) in buffer.iter_mut().zip(re) {
        slot.re = *value;
    }
    for (slot, value) in buffer.iter_mut().zip(im) {
        slot.im = *value;
    }
}

/// Bin `k` of the spectra of the real and imaginary rows packed into the
/// transformed `packed`.
pub(crate) fn unpack_pair(packed: &[Complex<f32>], k: usize) -> (Complex<f32>, Complex<f32>) {
    let n = packed.len();
    let z = packed[k];
    let mirror = packed[(n - k) % n].conj();
    ((z + mirror) * 0.5, (z - mirror) * Complex::new(0.0, -0.5))
}

/// Splits `data` into pairs of `len`-sized rows; the second row of a trailing
/// odd pair is empty.
pub(crate) fn row_pairs<'a>(
    data: &'a [f32],
    len: usize,
) -> impl Iterator<Item = (&'a [f32], &'a [f32])> + 'a {
    data.chunks(2 * len).map(move |pair| pair.split_at(len))
}

/// Smallest integer `>= target` whose only prime factors are 2, 3 and 5.
pub fn next_fast_len(target: usize) -> usize {
    let mut candidate = target.max(1);
    while !is_five_smooth(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_five_smooth(mut n: usize) -> bool {
    for p in [2, 3, 5] {
        while n % p == 0 {
            n /= p;
        }
    }
    n == 1
}

/// Borrows the live `f32` window of a contiguous CPU storage.
pub(crate) fn contiguous_f32<'a>(
    label: &str,
    storage: &'a CpuStorage,
    layout: &Layout,
) -> Result<&'a [f32]> {
    let data = storage.as_slice::<f32>()?;
    match layout.contiguous_offsets() {
        Some((start, end)) => Ok(&data[start..end]),
        None => bail!("{label}: expected a contiguous layout"),
    }
}

/// Reverses every `len`-sized row of `data`.
pub(crate) fn reverse_rows(data: &[f32], len: usize) -> Vec<f32> {
    data.chunks_exact(len)
        .flat_map(|row| row.iter().rev().copied())
        .collect()
}
