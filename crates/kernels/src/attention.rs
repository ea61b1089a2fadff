//! Attention mechanism kernels.

use crate::utils::softmax_inplace;
use anyhow::{ensure, Result};
use ndarray::{Array2, ArrayView2};

/// Additive causal mask for a window of `len` positions: `0` on and below the
/// diagonal, `-inf` above it, so position `i` only sees positions `j <= i`.
pub fn causal_mask(len: usize) -> Array2<f32> {
    Array2::from_shape_fn((len, len), |(i, j)| if j > i { f32::NEG_INFINITY } else { 0.0 })
}

pub fn scaled_dot_product_attention(
    query: ArrayView2<'_, f32>,
    key: ArrayView2<'_, f32>,
    value: ArrayView2<'_, f32>,
    mask: Option<ArrayView2<'_, f32>>,
    scale: f32,
) -> Result<Array2<f32>> {
    ensure!(
        query.ncols() == key.ncols(),
        "query dim {} must match key dim {}",
        query.ncols(),
        key.ncols()
    );
    let mut scores = query.dot(&key.t());
    scores *= scale;

    if let Some(mask) = mask {
        ensure!(
            mask.dim() == scores.dim(),
            "mask shape {:?} incompatible with attention scores {:?}",
            mask.dim(),
            scores.dim()
        );
        scores += &mask;
    }

    softmax_inplace(scores.view_mut());
    ensure!(
        scores.ncols() == value.nrows(),
        "scores column count {} differs from value rows {}",
        scores.ncols(),
        value.nrows()
    );
    let output = scores.dot(&value);
    Ok(output)
}

/// Scaled-dot-product attention under the causal mask of `query.nrows()`.
pub fn causal_attention(
    query: ArrayView2<'_, f32>,
    key: ArrayView2<'_, f32>,
    value: ArrayView2<'_, f32>,
    scale: f32,
) -> Result<Array2<f32>> {
    let mask = causal_mask(query.nrows());
    scaled_dot_product_attention(query, key, value, Some(mask.view()), scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn causal_mask_is_lower_triangular() {
        let mask = causal_mask(3);
        for i in 0..3 {
            for j in 0..3 {
                if j > i {
                    assert_eq!(mask[(i, j)], f32::NEG_INFINITY);
                } else {
                    assert_eq!(mask[(i, j)], 0.0);
                }
            }
        }
    }

    #[test]
    fn first_position_copies_its_own_value() {
        let q = Array2::from_shape_fn((3, 4), |(i, j)| (i + j) as f32 * 0.3);
        let k = Array2::from_shape_fn((3, 4), |(i, j)| (i * j) as f32 * 0.2);
        let v = Array2::from_shape_fn((3, 2), |(i, j)| (i * 2 + j) as f32);

        let out = causal_attention(q.view(), k.view(), v.view(), 0.5).expect("attention");
        assert_abs_diff_eq!(out[(0, 0)], v[(0, 0)], epsilon = 1e-6);
        assert_abs_diff_eq!(out[(0, 1)], v[(0, 1)], epsilon = 1e-6);
    }

    #[test]
    fn future_rows_do_not_leak_backwards() {
        let q = Array2::from_shape_fn((4, 3), |(i, j)| ((i + 1) * (j + 2)) as f32 * 0.1);
        let k = q.clone();
        let v = Array2::from_shape_fn((4, 3), |(i, j)| (i as f32 - j as f32) * 0.7);
        let baseline = causal_attention(q.view(), k.view(), v.view(), 0.5).expect("attention");

        let mut k_changed = k.clone();
        let mut v_changed = v.clone();
        k_changed.row_mut(3).fill(9.0);
        v_changed.row_mut(3).fill(-9.0);
        let changed =
            causal_attention(q.view(), k_changed.view(), v_changed.view(), 0.5).expect("attention");

        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(baseline[(i, j)], changed[(i, j)], epsilon = 1e-6);
            }
        }
        assert!((baseline[(3, 0)] - changed[(3, 0)]).abs() > 1e-3);
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let q = Array2::<f32>::zeros((2, 2));
        let mask = causal_mask(3);
        let err = scaled_dot_product_attention(q.view(), q.view(), q.view(), Some(mask.view()), 1.0);
        assert!(err.is_err());
    }
}
