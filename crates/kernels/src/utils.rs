//! Shared helpers for kernel implementations.

use crate::config::ActivationKind;
use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis};
use rayon::prelude::*;

pub fn validate_matmul_inputs(lhs: &ArrayView2<'_, f32>, rhs: &ArrayView2<'_, f32>) -> Result<()> {
    if lhs.ncols() != rhs.nrows() {
        bail!(
            "matmul dimension mismatch: lhs {}x{} vs rhs {}x{}",
            lhs.nrows(),
            lhs.ncols(),
            rhs.nrows(),
            rhs.ncols()
        );
    }
    Ok(())
}

/// Adds a per-column bias to every row, then applies `activation`.
pub fn apply_bias_activation(
    mut output: Array2<f32>,
    bias: Option<&ArrayView1<'_, f32>>,
    activation: ActivationKind,
) -> Result<Array2<f32>> {
    if let Some(bias) = bias {
        if bias.len() != output.ncols() {
            bail!(
                "bias length {} incompatible with output {:?}",
                bias.len(),
                output.shape()
            );
        }
        output += bias;
    }

    match activation {
        ActivationKind::None => Ok(output),
        ActivationKind::Relu => {
            output.mapv_inplace(|x| x.max(0.0));
            Ok(output)
        }
    }
}

fn softmax_row(mut row: ArrayViewMut1<'_, f32>) {
    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        // Fully masked row: nothing to attend to.
        row.fill(0.0);
        return;
    }
    row -= max;
    row.mapv_inplace(|x| x.exp());
    let sum = row.sum();
    row /= sum.max(f32::EPSILON);
}

/// Row-wise softmax. Entries equal to `-inf` receive zero probability.
pub fn softmax_inplace(mut scores: ArrayViewMut2<'_, f32>) {
    scores
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(softmax_row);
}

/// Softmax over a single logits vector.
pub fn softmax(logits: ArrayView1<'_, f32>) -> Array1<f32> {
    let mut probs = logits.to_owned();
    softmax_row(probs.view_mut());
    probs
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut scores = Array2::from_shape_fn((3, 5), |(i, j)| (i * j) as f32 * 0.3 - 1.0);
        softmax_inplace(scores.view_mut());
        for row in scores.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn softmax_ignores_negative_infinity() {
        let probs = softmax(array![0.0f32, f32::NEG_INFINITY, 0.0].view());
        assert_abs_diff_eq!(probs[0], 0.5, epsilon = 1e-6);
        assert_eq!(probs[1], 0.0);
        assert_abs_diff_eq!(probs[2], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn bias_broadcasts_then_relu_clamps() {
        let output = array![[1.0f32, -2.0], [0.5, 0.5]];
        let bias = array![-1.5f32, 1.0];
        let result = apply_bias_activation(output, Some(&bias.view()), ActivationKind::Relu)
            .expect("bias + relu");
        assert_eq!(result, array![[0.0, 0.0], [0.0, 1.5]]);
    }

    #[test]
    fn bias_length_mismatch_is_rejected() {
        let output = Array2::<f32>::zeros((2, 3));
        let bias = array![1.0f32, 2.0];
        assert!(apply_bias_activation(output, Some(&bias.view()), ActivationKind::None).is_err());
    }
}
