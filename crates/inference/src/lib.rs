//! Byte-level decoder-only transformer inference.
//!
//! This crate implements the serving core of a small character model:
//! - Byte vocabulary, tokenizer and lossy detokenizer
//! - Causal multi-head attention, pre-norm decoder blocks, LM head
//! - Multinomial autoregressive sampling over a sliding context window
//! - Output filtering and a request-level completion service
//! - Safetensors weight loading

pub mod attention;
pub mod config;
pub mod decoder;
pub mod error;
pub mod feed_forward;
pub mod filter;
pub mod generator;
pub mod layers;
pub mod model;
pub mod sampler;
pub mod service;
pub mod tokenizer;
pub mod vocab;
pub mod weights;

pub use config::{GenerationConfig, ModelConfig};
pub use error::{ErrorBody, ServeError};
pub use filter::filter_output;
pub use generator::{Generation, GenerationMetrics, StopReason};
pub use model::{ForwardOutput, LanguageModel};
pub use sampler::{MultinomialSampler, Sampler};
pub use service::{Completion, CompletionService};
pub use tokenizer::ByteTokenizer;
pub use vocab::Vocabulary;
pub use weights::ModelWeights;
