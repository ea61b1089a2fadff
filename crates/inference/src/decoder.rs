//! Pre-norm decoder block: self-attention + feed-forward, each residual.

use crate::attention::{AttentionHead, MultiHeadAttention};
use crate::config::ModelConfig;
use crate::feed_forward::FeedForward;
use crate::layers::{LayerNorm, Linear};
use crate::weights::DecoderWeights;
use anyhow::Result;
use bytegpt_kernels::matmul::MatmulKernel;
use ndarray::{Array2, ArrayView2};

#[derive(Debug, Clone)]
pub struct DecoderBlock {
    ln1: LayerNorm,
    attention: MultiHeadAttention,
    ln2: LayerNorm,
    feed_forward: FeedForward,
}

impl DecoderBlock {
    pub fn new(config: &ModelConfig, weights: DecoderWeights) -> Result<Self> {
        let heads = weights.heads.into_iter().map(AttentionHead::new).collect();
        let attention = MultiHeadAttention::new(
            heads,
            Linear::new(weights.proj_weight, Some(weights.proj_bias)),
        )?;
        let feed_forward = FeedForward::new(
            Linear::new(weights.ffn_up, Some(weights.ffn_up_bias)),
            Linear::new(weights.ffn_down, Some(weights.ffn_down_bias)),
        )?;

        Ok(Self {
            ln1: LayerNorm::new(weights.ln1_weight, weights.ln1_bias, config.layer_norm_eps),
            attention,
            ln2: LayerNorm::new(weights.ln2_weight, weights.ln2_bias, config.layer_norm_eps),
            feed_forward,
        })
    }

    /// Forward pass for a single decoder layer over a `(T, d_model)` window.
    ///
    /// `x + attn(ln1(x))`, then `x + ffn(ln2(x))`.
    pub fn forward(&self, kernel: &dyn MatmulKernel, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let x_norm = self.ln1.forward(x)?;
        let attn_out = self.attention.forward(kernel, x_norm.view())?;

        // Residual
        let x = &x + &attn_out;

        let x_norm = self.ln2.forward(x.view())?;
        let ffn_out = self.feed_forward.forward(kernel, x_norm.view())?;

        // Residual
        Ok(x + &ffn_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::ModelWeights;
    use approx::assert_abs_diff_eq;
    use bytegpt_kernels::matmul::ReferenceMatmul;

    #[test]
    fn zeroed_sublayers_leave_the_residual_stream_untouched() {
        let config = ModelConfig::tiny(9);
        let mut weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(21));
        let mut layer = weights.layers.remove(0);
        layer.proj_weight.fill(0.0);
        layer.ffn_down.fill(0.0);
        let block = DecoderBlock::new(&config, layer).expect("block");

        let x = Array2::from_shape_fn((3, config.d_model), |(i, j)| (i + j) as f32 * 0.01);
        let out = block.forward(&ReferenceMatmul::new(), x.view()).expect("forward");
        for (a, b) in out.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn block_is_causal() {
        let config = ModelConfig::tiny(9);
        let mut weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(22));
        let block = DecoderBlock::new(&config, weights.layers.remove(0)).expect("block");
        let kernel = ReferenceMatmul::new();

        let x = Array2::from_shape_fn((5, config.d_model), |(i, j)| ((i * 7 + j) % 5) as f32 * 0.3);
        let mut y = x.clone();
        y.row_mut(4).fill(1.5);

        let out_x = block.forward(&kernel, x.view()).expect("forward");
        let out_y = block.forward(&kernel, y.view()).expect("forward");
        for pos in 0..4 {
            for col in 0..config.d_model {
                assert_abs_diff_eq!(out_x[(pos, col)], out_y[(pos, col)], epsilon = 1e-5);
            }
        }
    }
}
