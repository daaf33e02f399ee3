use super::*;
use candle_core::{DType, Device, Result};

#[test]
fn gather_index_table_for_four_steps() {
    // Rows are output steps t, columns are source steps s.
    let expected = [[3, 0, 1, 2], [2, 3, 0, 1], [1, 2, 3, 0], [0, 1, 2, 3]];
    for (t, row) in expected.iter().enumerate() {
        for (s, want) in row.iter().enumerate() {
            assert_eq!(gather_index(s, t, 4), *want, "s={s} t={t}");
        }
    }
}

#[test]
fn diagonal_always_reads_the_last_kernel_entry() {
    for n in 1..12 {
        for t in 0..n {
            assert_eq!(gather_index(t, t, n), n - 1);
        }
    }
}

#[test]
fn causal_entries_never_wrap() {
    let n = 9;
    for t in 0..n {
        for s in 0..=t {
            assert_eq!(gather_index(s, t, n), n - 1 - (t - s));
        }
    }
}

#[test]
fn lag_index_tensor_matches_function() -> Result<()> {
    let n = 5;
    let index = lag_index(n, &Device::Cpu)?;
    assert_eq!(index.dims(), &[n, n]);
    assert_eq!(index.dtype(), DType::U32);
    let rows = index.to_vec2::<u32>()?;
    for (t, row) in rows.iter().enumerate() {
        for (s, value) in row.iter().enumerate() {
            assert_eq!(*value as usize, gather_index(s, t, n));
        }
    }
    Ok(())
}

#[test]
fn keep_mask_is_lower_triangular() -> Result<()> {
    let mask = causal_keep_mask(3, DType::F32, &Device::Cpu)?.to_vec2::<f32>()?;
    assert_eq!(
        mask,
        vec![
            vec![1.0, 0.0, 0.0],
            vec![1.0, 1.0, 0.0],
            vec![1.0, 1.0, 1.0]
        ]
    );
    Ok(())
}
