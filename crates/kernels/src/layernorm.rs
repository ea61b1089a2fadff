//! Layer normalization kernels.

use anyhow::ensure;
use anyhow::Result;
use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;

/// Normalizes each row to zero mean and unit (biased) variance, then applies
/// the optional per-feature `gamma` scale and `beta` shift.
pub fn layer_norm_inplace(
    mut data: ArrayViewMut2<'_, f32>,
    gamma: Option<ArrayView1<'_, f32>>,
    beta: Option<ArrayView1<'_, f32>>,
    epsilon: f32,
) -> Result<()> {
    let feature_dim = data.len_of(Axis(1));

    if let Some(gamma) = &gamma {
        ensure!(
            gamma.len() == feature_dim,
            "gamma length {} must equal feature dimension {}",
            gamma.len(),
            feature_dim
        );
    }
    if let Some(beta) = &beta {
        ensure!(
            beta.len() == feature_dim,
            "beta length {} must equal feature dimension {}",
            beta.len(),
            feature_dim
        );
    }

    data.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| {
            let len = row.len() as f32;
            let mean = row.iter().sum::<f32>() / len;
            let var = row.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / len;
            let inv_std = 1.0 / (var + epsilon).sqrt();

            for (idx, value) in row.iter_mut().enumerate() {
                let mut normalized = (*value - mean) * inv_std;
                if let Some(gamma) = &gamma {
                    normalized *= gamma[idx];
                }
                if let Some(beta) = &beta {
                    normalized += beta[idx];
                }
                *value = normalized;
            }
        });

    Ok(())
}

/// Non-mutating layer norm that returns a new array.
pub fn layer_norm(
    data: ArrayView2<'_, f32>,
    gamma: ArrayView1<'_, f32>,
    beta: ArrayView1<'_, f32>,
    epsilon: f32,
) -> Result<Array2<f32>> {
    let mut output = data.to_owned();
    layer_norm_inplace(output.view_mut(), Some(gamma), Some(beta), epsilon)?;
    Ok(output)
}
