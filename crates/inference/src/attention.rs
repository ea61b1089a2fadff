//! Causal self-attention: single heads and the multi-head wrapper.

use crate::layers::Linear;
use crate::weights::HeadWeights;
use anyhow::{ensure, Result};
use bytegpt_kernels::attention::causal_attention;
use bytegpt_kernels::config::ActivationKind;
use bytegpt_kernels::matmul::MatmulKernel;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rayon::prelude::*;

/// One attention head with bias-free key/query/value projections
/// `(d_model, head_dim)`.
#[derive(Debug, Clone)]
pub struct AttentionHead {
    query: Linear,
    key: Linear,
    value: Linear,
    head_dim: usize,
}

impl AttentionHead {
    pub fn new(weights: HeadWeights) -> Self {
        let head_dim = weights.query.ncols();
        Self {
            query: Linear::new(weights.query, None),
            key: Linear::new(weights.key, None),
            value: Linear::new(weights.value, None),
            head_dim,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// `(T, d_model) -> (T, head_dim)`. Row `i` depends only on rows `0..=i`.
    pub fn forward(&self, kernel: &dyn MatmulKernel, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let q = self.query.forward(kernel, x, ActivationKind::None)?;
        let k = self.key.forward(kernel, x, ActivationKind::None)?;
        let v = self.value.forward(kernel, x, ActivationKind::None)?;

        let scale = 1.0 / (self.head_dim as f32).sqrt();
        causal_attention(q.view(), k.view(), v.view(), scale)
    }
}

/// Heads run side by side over the same input; their outputs are
/// concatenated back to `d_model` columns and projected.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    heads: Vec<AttentionHead>,
    proj: Linear,
}

impl MultiHeadAttention {
    pub fn new(heads: Vec<AttentionHead>, proj: Linear) -> Result<Self> {
        ensure!(!heads.is_empty(), "multi-head attention needs at least one head");
        let width: usize = heads.iter().map(AttentionHead::head_dim).sum();
        ensure!(
            width == proj.in_features(),
            "heads cover {} features but the output projection expects {}",
            width,
            proj.in_features()
        );
        Ok(Self { heads, proj })
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    pub fn forward(&self, kernel: &dyn MatmulKernel, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let outputs = self
            .heads
            .par_iter()
            .map(|head| head.forward(kernel, x))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<ArrayView2<'_, f32>> = outputs.iter().map(|out| out.view()).collect();
        let concatenated = concatenate(Axis(1), &views)?;
        self.proj.forward(kernel, concatenated.view(), ActivationKind::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::weights::ModelWeights;
    use approx::assert_abs_diff_eq;
    use bytegpt_kernels::matmul::ReferenceMatmul;

    fn tiny_attention() -> (ModelConfig, MultiHeadAttention) {
        let config = ModelConfig::tiny(10);
        let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(11));
        let layer = weights.layers.into_iter().next().expect("one block");
        let heads = layer.heads.into_iter().map(AttentionHead::new).collect();
        let mha = MultiHeadAttention::new(heads, Linear::new(layer.proj_weight, Some(layer.proj_bias)))
            .expect("mha");
        (config, mha)
    }

    fn random_input(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
        let mut rng = fastrand::Rng::with_seed(seed);
        Array2::from_shape_simple_fn((rows, cols), || rng.f32() * 2.0 - 1.0)
    }

    #[test]
    fn single_head_output_shape() {
        let config = ModelConfig::tiny(10);
        let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(5));
        let head = AttentionHead::new(weights.layers[0].heads[0].clone());
        let out = head
            .forward(&ReferenceMatmul::new(), random_input(6, config.d_model, 1).view())
            .expect("head");
        assert_eq!(out.dim(), (6, config.head_dim()));
    }

    #[test]
    fn multi_head_output_shape() {
        let (config, mha) = tiny_attention();
        assert_eq!(mha.num_heads(), config.n_heads);
        let out = mha
            .forward(&ReferenceMatmul::new(), random_input(5, config.d_model, 2).view())
            .expect("mha");
        assert_eq!(out.dim(), (5, config.d_model));
    }

    #[test]
    fn multi_head_causal_masking() {
        let (config, mha) = tiny_attention();
        let kernel = ReferenceMatmul::new();
        let input_a = random_input(4, config.d_model, 3);
        let output_a = mha.forward(&kernel, input_a.view()).expect("mha");

        // Modify position 3: earlier positions must be unaffected.
        let mut input_b = input_a.clone();
        input_b.row_mut(3).assign(&random_input(1, config.d_model, 4).row(0));
        let output_b = mha.forward(&kernel, input_b.view()).expect("mha");

        for pos in 0..3 {
            for col in 0..config.d_model {
                assert_abs_diff_eq!(output_a[(pos, col)], output_b[(pos, col)], epsilon = 1e-6);
            }
        }
        let diff: f32 = (&output_a.row(3) - &output_b.row(3)).mapv(f32::abs).sum();
        assert!(diff > 1e-6, "position 3 should see its own change");
    }

    #[test]
    fn projection_width_must_match_heads() {
        let config = ModelConfig::tiny(10);
        let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(6));
        let layer = weights.layers[0].clone();
        let heads = layer.heads.into_iter().take(2).map(AttentionHead::new).collect();
        let err = MultiHeadAttention::new(heads, Linear::new(layer.proj_weight, None)).unwrap_err();
        assert!(err.to_string().contains("output projection"));
    }
}
