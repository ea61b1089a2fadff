//! Request handling: tokenize → generate → detokenize → filter.

use crate::config::GenerationConfig;
use crate::error::ServeError;
use crate::filter::filter_output;
use crate::model::LanguageModel;
use crate::sampler::{MultinomialSampler, Sampler};
use crate::tokenizer::ByteTokenizer;
use crate::vocab::Vocabulary;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `{"generated_text": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub generated_text: String,
}

/// Shared, read-only model and vocabulary. Cloning is cheap; every request
/// owns its own sequence buffer and sampler.
#[derive(Clone)]
pub struct CompletionService {
    model: Arc<LanguageModel>,
    tokenizer: ByteTokenizer,
    config: GenerationConfig,
}

impl CompletionService {
    pub fn new(
        model: Arc<LanguageModel>,
        vocab: Arc<Vocabulary>,
        config: GenerationConfig,
    ) -> Result<Self> {
        ensure!(
            vocab.len() == model.vocab_size(),
            "vocabulary has {} entries but the model expects {}",
            vocab.len(),
            model.vocab_size()
        );
        if let Some(stop) = config.stop_token.filter(|&stop| stop >= vocab.len()) {
            warn!(
                stop_token = stop,
                vocab_size = vocab.len(),
                "stop token outside vocabulary, generation will run to max_new_tokens"
            );
        }
        Ok(Self {
            model,
            tokenizer: ByteTokenizer::new(vocab),
            config,
        })
    }

    pub fn model(&self) -> &LanguageModel {
        &self.model
    }

    pub fn tokenizer(&self) -> &ByteTokenizer {
        &self.tokenizer
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Serves one request with a sampler seeded from the configuration, or
    /// from process entropy when no seed is set.
    pub fn generate(&self, context: &str) -> Result<Completion, ServeError> {
        let mut sampler = match self.config.seed {
            Some(seed) => MultinomialSampler::with_seed(seed),
            None => MultinomialSampler::new(),
        };
        self.generate_with(context, &mut sampler)
    }

    pub fn generate_with<S: Sampler + ?Sized>(
        &self,
        context: &str,
        sampler: &mut S,
    ) -> Result<Completion, ServeError> {
        let input_ids = self.tokenizer.encode(context);
        if input_ids.is_empty() {
            debug!(bytes = context.len(), "no prompt byte matched the vocabulary");
            return Err(ServeError::InvalidInput("Invalid input context".to_string()));
        }
        info!(tokens = input_ids.len(), "prompt encoded");

        let generation = self.model.generate(&input_ids, &self.config, sampler)?;
        info!(
            steps = generation.metrics.steps,
            tokens = generation.metrics.tokens_generated,
            elapsed_ms = generation.metrics.elapsed_ms,
            tokens_per_sec = generation.metrics.tokens_per_sec,
            stop_reason = ?generation.stop_reason,
            "generation finished"
        );

        let raw_text = self.tokenizer.decode(&generation.tokens)?;
        Ok(Completion {
            generated_text: filter_output(&raw_text),
        })
    }
}
