//! Autoregressive sampling loop.

use crate::config::GenerationConfig;
use crate::model::LanguageModel;
use crate::sampler::Sampler;
use anyhow::{ensure, Result};
use bytegpt_kernels::utils::softmax;
use std::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop token was sampled; it is not part of the output.
    StopToken,
    /// `max_new_tokens` steps ran without sampling the stop token.
    MaxSteps,
}

#[derive(Debug, Clone)]
pub struct GenerationMetrics {
    pub steps: usize,
    pub tokens_generated: usize,
    pub elapsed_ms: f64,
    pub tokens_per_sec: f64,
}

#[derive(Debug, Clone)]
pub struct Generation {
    /// Prompt followed by every appended token.
    pub tokens: Vec<usize>,
    pub prompt_len: usize,
    pub stop_reason: StopReason,
    pub metrics: GenerationMetrics,
}

impl Generation {
    pub fn generated(&self) -> &[usize] {
        &self.tokens[self.prompt_len..]
    }
}

impl LanguageModel {
    /// Extends `prompt` one sampled token at a time.
    ///
    /// Each step feeds the last `context_window` tokens through the model,
    /// softmaxes the final-position logits and asks `sampler` for an id.
    /// Ends when the stop token is drawn or after `max_new_tokens` steps.
    pub fn generate<S: Sampler + ?Sized>(
        &self,
        prompt: &[usize],
        config: &GenerationConfig,
        sampler: &mut S,
    ) -> Result<Generation> {
        ensure!(!prompt.is_empty(), "generation needs at least one prompt token");
        let context_window = self.context_window();
        let vocab_size = self.vocab_size();

        let start = Instant::now();
        let mut tokens = prompt.to_vec();
        let mut steps = 0;

        let stop_reason = loop {
            if steps == config.max_new_tokens {
                break StopReason::MaxSteps;
            }

            let window_start = tokens.len().saturating_sub(context_window);
            let logits = self.next_token_logits(&tokens[window_start..])?;
            ensure!(
                logits.iter().all(|x| x.is_finite()),
                "model produced non-finite logits at step {}",
                steps
            );
            let probs = softmax(logits.view());
            let next = sampler.sample(probs.view());
            ensure!(
                next < vocab_size,
                "sampler returned id {} outside vocabulary of {}",
                next,
                vocab_size
            );
            steps += 1;
            trace!(step = steps, token = next, "sampled");

            if config.stop_token == Some(next) {
                break StopReason::StopToken;
            }
            tokens.push(next);
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let tokens_generated = tokens.len() - prompt.len();
        let tokens_per_sec = if elapsed_ms > 0.0 {
            (tokens_generated as f64 / elapsed_ms) * 1000.0
        } else {
            0.0
        };

        Ok(Generation {
            tokens,
            prompt_len: prompt.len(),
            stop_reason,
            metrics: GenerationMetrics {
                steps,
                tokens_generated,
                elapsed_ms,
                tokens_per_sec,
            },
        })
    }
}
