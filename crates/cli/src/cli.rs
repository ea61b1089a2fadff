//! CLI wiring for the bytegpt completion core.

use anyhow::{Context, Result};
use bytegpt_inference::{
    CompletionService, GenerationConfig, LanguageModel, ModelConfig, ModelWeights, Vocabulary,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bytegpt", about = "Byte-level transformer completion toolkit")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Complete a prompt and print `{"generated_text": ...}`.
    Generate {
        #[arg(long)]
        prompt: String,
        /// Safetensors weights; a random tiny model is used when omitted.
        #[arg(long, requires = "vocab")]
        weights: Option<PathBuf>,
        /// JSON vocabulary (array of byte arrays).
        #[arg(long)]
        vocab: Option<PathBuf>,
        /// JSON model config. Defaults to the reference hyper-parameters with
        /// `--weights` and to the tiny preset without.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = bytegpt_inference::config::DEFAULT_MAX_NEW_TOKENS)]
        max_new_tokens: usize,
        #[arg(long, default_value_t = bytegpt_inference::config::DEFAULT_STOP_TOKEN)]
        stop_token: usize,
        /// Disable stop-token detection.
        #[arg(long, default_value_t = false, conflicts_with = "stop_token")]
        no_stop: bool,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = bytegpt_inference::model::DEFAULT_MATMUL_KERNEL)]
        kernel: String,
    },
    /// Print the token ids of a text under a vocabulary.
    Tokenize {
        #[arg(long)]
        vocab: PathBuf,
        #[arg(long)]
        text: String,
    },
    /// Write random weights in the serving layout.
    Init {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        vocab: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

pub fn run_cli(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Generate {
            prompt,
            weights,
            vocab,
            config,
            max_new_tokens,
            stop_token,
            no_stop,
            seed,
            kernel,
        } => {
            let generation = GenerationConfig {
                max_new_tokens,
                stop_token: (!no_stop).then_some(stop_token),
                seed,
            };
            let service = build_service(
                weights.as_deref(),
                vocab.as_deref(),
                config.as_deref(),
                &kernel,
                generation,
            )?;

            match service.generate(&prompt) {
                Ok(completion) => println!("{}", serde_json::to_string(&completion)?),
                Err(err) => {
                    println!("{}", serde_json::to_string(&err.body())?);
                    anyhow::bail!("generation failed with status {}", err.status_code());
                }
            }
        }
        Command::Tokenize { vocab, text } => {
            let vocab = Arc::new(Vocabulary::from_json_file(&vocab)?);
            let tokenizer = bytegpt_inference::ByteTokenizer::new(vocab);
            let ids = tokenizer.encode(&text);
            info!(bytes = text.len(), tokens = ids.len(), "text encoded");
            println!("{}", serde_json::to_string(&ids)?);
        }
        Command::Init {
            config,
            vocab,
            out,
            seed,
        } => {
            let vocab = load_vocab(vocab.as_deref())?;
            let config = load_config(config.as_deref(), vocab.len())?;
            let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(seed));
            weights.save_safetensors(&out)?;
            info!(
                path = %out.display(),
                parameters = weights.parameter_count(),
                "random weights written"
            );
        }
    }
    Ok(())
}

fn load_vocab(path: Option<&Path>) -> Result<Vocabulary> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading vocabulary");
            Vocabulary::from_json_file(path)
        }
        None => {
            info!("using byte-level vocabulary");
            Ok(Vocabulary::byte_level())
        }
    }
}

fn load_config(path: Option<&Path>, vocab_size: usize) -> Result<ModelConfig> {
    let config = match path {
        Some(path) => ModelConfig::from_json_file(path)?,
        None => ModelConfig::reference(vocab_size),
    };
    anyhow::ensure!(
        config.vocab_size == vocab_size,
        "model config expects {} tokens but the vocabulary has {}",
        config.vocab_size,
        vocab_size
    );
    Ok(config)
}

fn build_service(
    weights: Option<&Path>,
    vocab: Option<&Path>,
    config: Option<&Path>,
    kernel: &str,
    generation: GenerationConfig,
) -> Result<CompletionService> {
    let vocab = load_vocab(vocab)?;
    let (config, model_weights) = match weights {
        Some(path) => {
            let config = load_config(config, vocab.len())?;
            info!(path = %path.display(), "loading weights from safetensors");
            let weights = ModelWeights::load_safetensors(path, &config)
                .with_context(|| format!("failed to load weights from {}", path.display()))?;
            (config, weights)
        }
        None => {
            info!("using random weights (not pretrained)");
            let config = match config {
                Some(_) => load_config(config, vocab.len())?,
                None => ModelConfig::tiny(vocab.len()),
            };
            let mut rng = match generation.seed {
                Some(seed) => fastrand::Rng::with_seed(seed),
                None => fastrand::Rng::new(),
            };
            let weights = ModelWeights::random(&config, &mut rng);
            (config, weights)
        }
    };

    let model = LanguageModel::with_kernel(config, model_weights, kernel)?;
    info!(
        layers = model.config().n_layers,
        d_model = model.config().d_model,
        context_window = model.context_window(),
        kernel = model.kernel_name(),
        "model ready"
    );
    CompletionService::new(Arc::new(model), Arc::new(vocab), generation)
}
