//! Model and generation configuration.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_layer_norm_eps() -> f32 {
    1e-5
}

/// Architecture hyper-parameters of the decoder-only transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    /// Maximum number of trailing tokens fed to one forward pass.
    pub context_window: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f32,
}

impl ModelConfig {
    /// Hyper-parameters of the served character model
    /// (context 64, embed 384, 6 heads, 6 layers).
    pub fn reference(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            d_model: 384,
            n_layers: 6,
            n_heads: 6,
            context_window: 64,
            layer_norm_eps: default_layer_norm_eps(),
        }
    }

    /// Tiny test config for quick iteration
    pub fn tiny(vocab_size: usize) -> Self {
        Self {
            vocab_size,
            d_model: 32,
            n_layers: 2,
            n_heads: 4,
            context_window: 16,
            layer_norm_eps: default_layer_norm_eps(),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let blob = fs::read_to_string(path)
            .with_context(|| format!("failed to read model config {}", path.display()))?;
        let config: Self = serde_json::from_str(&blob)
            .with_context(|| format!("failed to parse model config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }

    pub fn ffn_dim(&self) -> usize {
        4 * self.d_model
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.vocab_size > 0, "vocab_size must be positive");
        ensure!(self.d_model > 0, "d_model must be positive");
        ensure!(self.n_layers > 0, "n_layers must be positive");
        ensure!(self.n_heads > 0, "n_heads must be positive");
        ensure!(self.context_window > 0, "context_window must be positive");
        ensure!(
            self.d_model % self.n_heads == 0,
            "d_model {} is not divisible by n_heads {}",
            self.d_model,
            self.n_heads
        );
        ensure!(
            self.layer_norm_eps > 0.0,
            "layer_norm_eps must be positive, got {}",
            self.layer_norm_eps
        );
        Ok(())
    }
}

pub const DEFAULT_MAX_NEW_TOKENS: usize = 500;
pub const DEFAULT_STOP_TOKEN: usize = 46;

fn default_max_new_tokens() -> usize {
    DEFAULT_MAX_NEW_TOKENS
}

fn default_stop_token() -> Option<usize> {
    Some(DEFAULT_STOP_TOKEN)
}

/// Controls for the autoregressive sampling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Upper bound on sampling steps per request.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    /// Sampling this id ends generation; the id itself is not appended.
    #[serde(default = "default_stop_token")]
    pub stop_token: Option<usize>,
    /// Fixed sampler seed. `None` draws from process entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            stop_token: default_stop_token(),
            seed: None,
        }
    }
}
