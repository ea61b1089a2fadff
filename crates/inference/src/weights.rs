//! Weight structures, safetensors load/save and random initialization.
//!
//! Linear weights are stored `(in_features, out_features)` so a layer is
//! `x @ W + b`. Tensor names:
//!
//! - `token_embedding` `(vocab_size, d_model)`, `position_embedding` `(context_window, d_model)`
//! - `blocks.{i}.heads.{h}.{query,key,value}` `(d_model, head_dim)`, no bias
//! - `blocks.{i}.proj.{weight,bias}`, `blocks.{i}.ffn.{up,down}.{weight,bias}`
//! - `blocks.{i}.{ln1,ln2}.{weight,bias}`, `final_ln.{weight,bias}`
//! - `lm_head.{weight,bias}` `(d_model, vocab_size)`

use crate::config::ModelConfig;
use anyhow::{ensure, Context, Result};
use ndarray::{Array1, Array2};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HeadWeights {
    pub query: Array2<f32>,
    pub key: Array2<f32>,
    pub value: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct DecoderWeights {
    // Attention
    pub heads: Vec<HeadWeights>,
    pub proj_weight: Array2<f32>,
    pub proj_bias: Array1<f32>,

    // LayerNorm (pre-attention)
    pub ln1_weight: Array1<f32>,
    pub ln1_bias: Array1<f32>,

    // Feed-forward
    pub ffn_up: Array2<f32>,
    pub ffn_up_bias: Array1<f32>,
    pub ffn_down: Array2<f32>,
    pub ffn_down_bias: Array1<f32>,

    // LayerNorm (pre-feed-forward)
    pub ln2_weight: Array1<f32>,
    pub ln2_bias: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct ModelWeights {
    pub token_embedding: Array2<f32>,
    pub position_embedding: Array2<f32>,
    pub layers: Vec<DecoderWeights>,
    pub final_ln_weight: Array1<f32>,
    pub final_ln_bias: Array1<f32>,
    pub lm_head: Array2<f32>,
    pub lm_head_bias: Array1<f32>,
}

fn ensure_shape(name: &str, actual: &[usize], expected: &[usize]) -> Result<()> {
    ensure!(
        actual == expected,
        "tensor '{}' has shape {:?}, expected {:?}",
        name,
        actual,
        expected
    );
    Ok(())
}

impl ModelWeights {
    /// Load weights from a safetensors file laid out for `config`.
    pub fn load_safetensors(path: impl AsRef<Path>, config: &ModelConfig) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .with_context(|| format!("failed to read safetensors file {}", path.display()))?;
        Self::from_safetensors_bytes(&data, config)
    }

    pub fn from_safetensors_bytes(data: &[u8], config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let tensors = SafeTensors::deserialize(data).context("failed to parse safetensors")?;
        debug!(tensors = tensors.names().len(), "parsed safetensors header");

        let d = config.d_model;
        let hd = config.head_dim();
        let ff = config.ffn_dim();

        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            let prefix = format!("blocks.{}", i);
            let mut heads = Vec::with_capacity(config.n_heads);
            for h in 0..config.n_heads {
                let head = format!("{}.heads.{}", prefix, h);
                heads.push(HeadWeights {
                    query: load_tensor_2d(&tensors, &format!("{}.query", head), (d, hd))?,
                    key: load_tensor_2d(&tensors, &format!("{}.key", head), (d, hd))?,
                    value: load_tensor_2d(&tensors, &format!("{}.value", head), (d, hd))?,
                });
            }
            layers.push(DecoderWeights {
                heads,
                proj_weight: load_tensor_2d(&tensors, &format!("{}.proj.weight", prefix), (d, d))?,
                proj_bias: load_tensor_1d(&tensors, &format!("{}.proj.bias", prefix), d)?,
                ln1_weight: load_tensor_1d(&tensors, &format!("{}.ln1.weight", prefix), d)?,
                ln1_bias: load_tensor_1d(&tensors, &format!("{}.ln1.bias", prefix), d)?,
                ffn_up: load_tensor_2d(&tensors, &format!("{}.ffn.up.weight", prefix), (d, ff))?,
                ffn_up_bias: load_tensor_1d(&tensors, &format!("{}.ffn.up.bias", prefix), ff)?,
                ffn_down: load_tensor_2d(&tensors, &format!("{}.ffn.down.weight", prefix), (ff, d))?,
                ffn_down_bias: load_tensor_1d(&tensors, &format!("{}.ffn.down.bias", prefix), d)?,
                ln2_weight: load_tensor_1d(&tensors, &format!("{}.ln2.weight", prefix), d)?,
                ln2_bias: load_tensor_1d(&tensors, &format!("{}.ln2.bias", prefix), d)?,
            });
        }

        Ok(Self {
            token_embedding: load_tensor_2d(&tensors, "token_embedding", (config.vocab_size, d))?,
            position_embedding: load_tensor_2d(
                &tensors,
                "position_embedding",
                (config.context_window, d),
            )?,
            layers,
            final_ln_weight: load_tensor_1d(&tensors, "final_ln.weight", d)?,
            final_ln_bias: load_tensor_1d(&tensors, "final_ln.bias", d)?,
            lm_head: load_tensor_2d(&tensors, "lm_head.weight", (d, config.vocab_size))?,
            lm_head_bias: load_tensor_1d(&tensors, "lm_head.bias", config.vocab_size)?,
        })
    }

    /// Every tensor with its safetensors name, in a stable order.
    fn named_tensors(&self) -> Vec<(String, Vec<usize>, Vec<f32>)> {
        fn entry2(name: String, array: &Array2<f32>) -> (String, Vec<usize>, Vec<f32>) {
            (name, array.shape().to_vec(), array.iter().copied().collect())
        }
        fn entry1(name: String, array: &Array1<f32>) -> (String, Vec<usize>, Vec<f32>) {
            (name, vec![array.len()], array.to_vec())
        }

        let mut out = vec![
            entry2("token_embedding".into(), &self.token_embedding),
            entry2("position_embedding".into(), &self.position_embedding),
            entry1("final_ln.weight".into(), &self.final_ln_weight),
            entry1("final_ln.bias".into(), &self.final_ln_bias),
            entry2("lm_head.weight".into(), &self.lm_head),
            entry1("lm_head.bias".into(), &self.lm_head_bias),
        ];
        for (i, layer) in self.layers.iter().enumerate() {
            let prefix = format!("blocks.{}", i);
            for (h, head) in layer.heads.iter().enumerate() {
                let name = format!("{}.heads.{}", prefix, h);
                out.push(entry2(format!("{}.query", name), &head.query));
                out.push(entry2(format!("{}.key", name), &head.key));
                out.push(entry2(format!("{}.value", name), &head.value));
            }
            out.push(entry2(format!("{}.proj.weight", prefix), &layer.proj_weight));
            out.push(entry1(format!("{}.proj.bias", prefix), &layer.proj_bias));
            out.push(entry1(format!("{}.ln1.weight", prefix), &layer.ln1_weight));
            out.push(entry1(format!("{}.ln1.bias", prefix), &layer.ln1_bias));
            out.push(entry2(format!("{}.ffn.up.weight", prefix), &layer.ffn_up));
            out.push(entry1(format!("{}.ffn.up.bias", prefix), &layer.ffn_up_bias));
            out.push(entry2(format!("{}.ffn.down.weight", prefix), &layer.ffn_down));
            out.push(entry1(format!("{}.ffn.down.bias", prefix), &layer.ffn_down_bias));
            out.push(entry1(format!("{}.ln2.weight", prefix), &layer.ln2_weight));
            out.push(entry1(format!("{}.ln2.bias", prefix), &layer.ln2_bias));
        }
        out
    }

    pub fn to_safetensors_bytes(&self) -> Result<Vec<u8>> {
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = self
            .named_tensors()
            .into_iter()
            .map(|(name, shape, values)| {
                let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                (name, shape, bytes)
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map(|view| (name.as_str(), view))
                    .with_context(|| format!("failed to build tensor view for '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?;

        safetensors::serialize(views.iter().map(|(name, view)| (*name, view)), &None)
            .context("failed to serialize safetensors")
    }

    pub fn save_safetensors(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_safetensors_bytes()?;
        fs::write(path, bytes)
            .with_context(|| format!("failed to write safetensors file {}", path.display()))
    }

    /// Create random weights for testing (not for real inference)
    pub fn random(config: &ModelConfig, rng: &mut fastrand::Rng) -> Self {
        let d = config.d_model;
        let hd = config.head_dim();
        let ff = config.ffn_dim();

        let mut random_array = |shape: (usize, usize)| {
            Array2::from_shape_simple_fn(shape, || (rng.f32() - 0.5) * 0.2)
        };

        let token_embedding = random_array((config.vocab_size, d));
        let position_embedding = random_array((config.context_window, d));
        let lm_head = random_array((d, config.vocab_size));

        let mut layers = Vec::with_capacity(config.n_layers);
        for _ in 0..config.n_layers {
            let heads = (0..config.n_heads)
                .map(|_| HeadWeights {
                    query: random_array((d, hd)),
                    key: random_array((d, hd)),
                    value: random_array((d, hd)),
                })
                .collect();
            layers.push(DecoderWeights {
                heads,
                proj_weight: random_array((d, d)),
                proj_bias: Array1::zeros(d),
                ln1_weight: Array1::ones(d),
                ln1_bias: Array1::zeros(d),
                ffn_up: random_array((d, ff)),
                ffn_up_bias: Array1::zeros(ff),
                ffn_down: random_array((ff, d)),
                ffn_down_bias: Array1::zeros(d),
                ln2_weight: Array1::ones(d),
                ln2_bias: Array1::zeros(d),
            });
        }

        Self {
            token_embedding,
            position_embedding,
            layers,
            final_ln_weight: Array1::ones(d),
            final_ln_bias: Array1::zeros(d),
            lm_head,
            lm_head_bias: Array1::zeros(config.vocab_size),
        }
    }

    /// Checks every tensor shape against `config`.
    pub fn validate(&self, config: &ModelConfig) -> Result<()> {
        config.validate()?;
        let d = config.d_model;
        let hd = config.head_dim();
        let ff = config.ffn_dim();

        ensure_shape("token_embedding", self.token_embedding.shape(), &[config.vocab_size, d])?;
        ensure_shape(
            "position_embedding",
            self.position_embedding.shape(),
            &[config.context_window, d],
        )?;
        ensure_shape("final_ln.weight", self.final_ln_weight.shape(), &[d])?;
        ensure_shape("final_ln.bias", self.final_ln_bias.shape(), &[d])?;
        ensure_shape("lm_head.weight", self.lm_head.shape(), &[d, config.vocab_size])?;
        ensure_shape("lm_head.bias", self.lm_head_bias.shape(), &[config.vocab_size])?;
        ensure!(
            self.layers.len() == config.n_layers,
            "expected {} blocks, found {}",
            config.n_layers,
            self.layers.len()
        );

        for (i, layer) in self.layers.iter().enumerate() {
            ensure!(
                layer.heads.len() == config.n_heads,
                "block {} has {} heads, expected {}",
                i,
                layer.heads.len(),
                config.n_heads
            );
            for (h, head) in layer.heads.iter().enumerate() {
                for (part, array) in [("query", &head.query), ("key", &head.key), ("value", &head.value)] {
                    let name = format!("blocks.{}.heads.{}.{}", i, h, part);
                    ensure_shape(&name, array.shape(), &[d, hd])?;
                }
            }
            let prefix = format!("blocks.{}", i);
            let matrices = [
                ("proj.weight", &layer.proj_weight, [d, d]),
                ("ffn.up.weight", &layer.ffn_up, [d, ff]),
                ("ffn.down.weight", &layer.ffn_down, [ff, d]),
            ];
            for (part, array, expected) in matrices {
                ensure_shape(&format!("{}.{}", prefix, part), array.shape(), &expected)?;
            }
            let vectors = [
                ("proj.bias", &layer.proj_bias, d),
                ("ln1.weight", &layer.ln1_weight, d),
                ("ln1.bias", &layer.ln1_bias, d),
                ("ffn.up.bias", &layer.ffn_up_bias, ff),
                ("ffn.down.bias", &layer.ffn_down_bias, d),
                ("ln2.weight", &layer.ln2_weight, d),
                ("ln2.bias", &layer.ln2_bias, d),
            ];
            for (part, array, expected) in vectors {
                ensure_shape(&format!("{}.{}", prefix, part), array.shape(), &[expected])?;
            }
        }
        Ok(())
    }

    pub fn parameter_count(&self) -> usize {
        self.named_tensors()
            .iter()
            .map(|(_, shape, _)| shape.iter().product::<usize>())
            .sum()
    }
}

fn tensor_floats(tensors: &SafeTensors<'_>, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
    let view = tensors
        .tensor(name)
        .with_context(|| format!("tensor '{}' not found", name))?;
    ensure!(
        view.dtype() == Dtype::F32,
        "tensor '{}' has dtype {:?}, expected F32",
        name,
        view.dtype()
    );

    let floats: Vec<f32> = view
        .data()
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok((view.shape().to_vec(), floats))
}

fn load_tensor_2d(
    tensors: &SafeTensors<'_>,
    name: &str,
    expected: (usize, usize),
) -> Result<Array2<f32>> {
    let (shape, floats) = tensor_floats(tensors, name)?;
    ensure_shape(name, &shape, &[expected.0, expected.1])?;
    Array2::from_shape_vec(expected, floats)
        .with_context(|| format!("failed to reshape tensor '{}'", name))
}

fn load_tensor_1d(tensors: &SafeTensors<'_>, name: &str, expected: usize) -> Result<Array1<f32>> {
    let (shape, floats) = tensor_floats(tensors, name)?;
    ensure_shape(name, &shape, &[expected])?;
    Ok(Array1::from_vec(floats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_weights_match_config() {
        let config = ModelConfig::tiny(12);
        let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(1));
        weights.validate(&config).expect("shapes line up");

        let other = ModelConfig { vocab_size: 13, ..config };
        let err = weights.validate(&other).unwrap_err();
        assert!(err.to_string().contains("token_embedding"));
    }

    #[test]
    fn safetensors_bytes_reload_identically() {
        let config = ModelConfig::tiny(7);
        let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(2));
        let bytes = weights.to_safetensors_bytes().expect("serialize");

        let reloaded = ModelWeights::from_safetensors_bytes(&bytes, &config).expect("load");
        assert_eq!(reloaded.token_embedding, weights.token_embedding);
        assert_eq!(reloaded.layers[1].heads[3].value, weights.layers[1].heads[3].value);
        assert_eq!(reloaded.layers[0].ffn_down_bias, weights.layers[0].ffn_down_bias);
        assert_eq!(reloaded.lm_head, weights.lm_head);
    }

    #[test]
    fn loading_with_wrong_config_names_the_tensor() {
        let config = ModelConfig::tiny(7);
        let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(3));
        let bytes = weights.to_safetensors_bytes().expect("serialize");

        let wider = ModelConfig {
            context_window: 32,
            ..config
        };
        let err = ModelWeights::from_safetensors_bytes(&bytes, &wider).unwrap_err();
        assert!(err.to_string().contains("position_embedding"));
    }

    #[test]
    fn parameter_count_sums_all_tensors() {
        let config = ModelConfig {
            vocab_size: 5,
            d_model: 4,
            n_layers: 1,
            n_heads: 2,
            context_window: 3,
            layer_norm_eps: 1e-5,
        };
        let weights = ModelWeights::random(&config, &mut fastrand::Rng::with_seed(4));
        // embeddings 20 + 12, final ln 8, head 20 + 5
        // block: heads 3*2*(4*2)=48, proj 16+4, ln 8+8, ffn 64+16+64+4
        assert_eq!(weights.parameter_count(), 20 + 12 + 8 + 25 + 48 + 20 + 16 + 148);
    }
}
