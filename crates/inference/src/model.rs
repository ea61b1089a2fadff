//! Full model with embeddings, decoder stack, and LM head.

use crate::config::ModelConfig;
use crate::decoder::DecoderBlock;
use crate::layers::{LayerNorm, Linear};
use crate::weights::ModelWeights;
use anyhow::{ensure, Context, Result};
use bytegpt_kernels::config::ActivationKind;
use bytegpt_kernels::matmul::DynMatmulKernel;
use bytegpt_kernels::registry::KernelRegistry;
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use tracing::debug;

pub const DEFAULT_MATMUL_KERNEL: &str = "reference";

pub struct LanguageModel {
    config: ModelConfig,
    kernel: DynMatmulKernel,
    token_embedding: Array2<f32>,
    position_embedding: Array2<f32>,
    blocks: Vec<DecoderBlock>,
    final_ln: LayerNorm,
    lm_head: Linear,
}

/// Logits for every input position, plus the mean cross-entropy when
/// targets were supplied.
#[derive(Debug)]
pub struct ForwardOutput {
    pub logits: Array2<f32>,
    pub loss: Option<f32>,
}

impl LanguageModel {
    pub fn new(config: ModelConfig, weights: ModelWeights) -> Result<Self> {
        Self::with_kernel(config, weights, DEFAULT_MATMUL_KERNEL)
    }

    pub fn with_kernel(config: ModelConfig, weights: ModelWeights, kernel: &str) -> Result<Self> {
        weights.validate(&config)?;
        let registry = KernelRegistry::with_default_matmul_kernels();
        let kernel = registry.find_matmul_kernel(kernel).with_context(|| {
            format!(
                "unknown matmul kernel '{}' (available: {})",
                kernel,
                registry.kernel_names().join(", ")
            )
        })?;

        let ModelWeights {
            token_embedding,
            position_embedding,
            layers,
            final_ln_weight,
            final_ln_bias,
            lm_head,
            lm_head_bias,
        } = weights;

        let blocks = layers
            .into_iter()
            .map(|layer| DecoderBlock::new(&config, layer))
            .collect::<Result<Vec<_>>>()?;
        let final_ln = LayerNorm::new(final_ln_weight, final_ln_bias, config.layer_norm_eps);

        debug!(
            layers = blocks.len(),
            d_model = config.d_model,
            kernel = kernel.name(),
            "model assembled"
        );

        Ok(Self {
            config,
            kernel,
            token_embedding,
            position_embedding,
            blocks,
            final_ln,
            lm_head: Linear::new(lm_head, Some(lm_head_bias)),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    pub fn context_window(&self) -> usize {
        self.config.context_window
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Token embedding plus position embedding for positions `0..T`.
    fn embed(&self, token_ids: &[usize]) -> Result<Array2<f32>> {
        let seq_len = token_ids.len();
        ensure!(seq_len > 0, "cannot run the model on an empty sequence");
        ensure!(
            seq_len <= self.config.context_window,
            "sequence of {} tokens exceeds context window {}",
            seq_len,
            self.config.context_window
        );

        let mut hidden = self.position_embedding.slice(s![..seq_len, ..]).to_owned();
        for (mut row, &token_id) in hidden.axis_iter_mut(Axis(0)).zip(token_ids) {
            ensure!(
                token_id < self.config.vocab_size,
                "token id {} outside vocabulary of {}",
                token_id,
                self.config.vocab_size
            );
            row += &self.token_embedding.row(token_id);
        }
        Ok(hidden)
    }

    /// Embed, run the decoder stack, apply the final layer norm.
    fn hidden_states(&self, token_ids: &[usize]) -> Result<Array2<f32>> {
        let mut hidden = self.embed(token_ids)?;
        for block in &self.blocks {
            hidden = block.forward(self.kernel.as_ref(), hidden.view())?;
        }
        self.final_ln.forward(hidden.view())
    }

    /// Forward pass: embed → decoder stack → final norm → LM head.
    pub fn forward(&self, token_ids: &[usize], targets: Option<&[usize]>) -> Result<ForwardOutput> {
        let hidden = self.hidden_states(token_ids)?;
        let logits = self
            .lm_head
            .forward(self.kernel.as_ref(), hidden.view(), ActivationKind::None)?;

        let loss = match targets {
            Some(targets) => Some(cross_entropy(logits.view(), targets)?),
            None => None,
        };
        Ok(ForwardOutput { logits, loss })
    }

    /// Logits at the final position only.
    pub fn next_token_logits(&self, token_ids: &[usize]) -> Result<Array1<f32>> {
        let hidden = self.hidden_states(token_ids)?;
        let last_row = hidden.nrows() - 1;
        let last = hidden.slice(s![last_row.., ..]);
        let logits = self
            .lm_head
            .forward(self.kernel.as_ref(), last, ActivationKind::None)?;
        Ok(logits.row(0).to_owned())
    }
}

/// Mean over positions of `-log softmax(logits)[target]`.
pub fn cross_entropy(logits: ArrayView2<'_, f32>, targets: &[usize]) -> Result<f32> {
    ensure!(
        logits.nrows() == targets.len(),
        "{} target ids for {} positions",
        targets.len(),
        logits.nrows()
    );
    ensure!(!targets.is_empty(), "cross-entropy over an empty sequence");

    let mut total = 0.0f32;
    for (row, &target) in logits.axis_iter(Axis(0)).zip(targets) {
        ensure!(
            target < row.len(),
            "target id {} outside vocabulary of {}",
            target,
            row.len()
        );
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;
        total += log_sum - row[target];
    }
    Ok(total / targets.len() as f32)
}
