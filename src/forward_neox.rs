//! GPT-NeoX (Pythia) forward pass with attention capture.
//!
//! NeoX differs from GPT-2 in three ways that matter here: rotary position
//! embeddings (applied to a prefix of each head dimension), a fused
//! query-key-value projection interleaved per head, and a parallel residual
//! where attention and MLP both read the same input
//! (`x + attn(ln1(x)) + mlp(ln2(x))`).

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{embedding, layer_norm, linear, Embedding, LayerNorm, Linear, Module, VarBuilder};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::Deserialize;
use tracing::info;

use crate::capture::AttentionCapture;
use crate::extractor::AttentionBackend;
use crate::masks::create_causal_mask;

/// NeoX end-of-text token, used as the BOS sentinel
const NEOX_BOS_TOKEN_ID: u32 = 0;

fn default_rotary_pct() -> f64 {
    0.25
}

fn default_rotary_base() -> f64 {
    10_000.0
}

fn default_parallel_residual() -> bool {
    true
}

fn default_ln_eps() -> f64 {
    1e-5
}

#[derive(Debug, Deserialize)]
struct NeoXConfig {
    num_hidden_layers: usize,
    num_attention_heads: usize,
    hidden_size: usize,
    vocab_size: usize,
    max_position_embeddings: usize,
    #[serde(default = "default_rotary_pct")]
    rotary_pct: f64,
    #[serde(default = "default_rotary_base")]
    rotary_emb_base: f64,
    #[serde(default = "default_ln_eps")]
    layer_norm_eps: f64,
    #[serde(default = "default_parallel_residual")]
    use_parallel_residual: bool,
}

/// Safetensors index for sharded models
#[derive(Debug, Deserialize)]
struct SafetensorsIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Precomputed rotary tables for the rotated prefix of each head dimension
struct RotaryEmbedding {
    cos: Tensor,
    sin: Tensor,
    rotary_ndims: usize,
}

impl RotaryEmbedding {
    fn new(rotary_ndims: usize, max_positions: usize, base: f64, device: &Device) -> Result<Self> {
        let inv_freq: Vec<f32> = (0..rotary_ndims / 2)
            .map(|i| (1.0 / base.powf(2.0 * i as f64 / rotary_ndims as f64)) as f32)
            .collect();

        let mut cos = Vec::with_capacity(max_positions * rotary_ndims);
        let mut sin = Vec::with_capacity(max_positions * rotary_ndims);
        for pos in 0..max_positions {
            // NeoX duplicates the frequency table across both halves
            let angles: Vec<f32> = inv_freq.iter().map(|&f| pos as f32 * f).collect();
            for &angle in angles.iter().chain(angles.iter()) {
                cos.push(angle.cos());
                sin.push(angle.sin());
            }
        }

        let cos = Tensor::from_vec(cos, (max_positions, rotary_ndims), device)?;
        let sin = Tensor::from_vec(sin, (max_positions, rotary_ndims), device)?;
        Ok(Self {
            cos,
            sin,
            rotary_ndims,
        })
    }

    /// Negate the second half and swap: `[x1, x2] -> [-x2, x1]`
    fn rotate_half(x: &Tensor) -> Result<Tensor> {
        let half = x.dim(3)? / 2;
        let x1 = x.narrow(3, 0, half)?;
        let x2 = x.narrow(3, half, half)?;
        Ok(Tensor::cat(&[&x2.neg()?, &x1], 3)?)
    }

    /// Apply rotation to the first `rotary_ndims` of q and k
    ///
    /// Input shape `[batch, heads, seq, head_dim]`.
    fn apply(&self, q: &Tensor, k: &Tensor) -> Result<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        let head_dim = q.dim(3)?;
        let pass_dims = head_dim - self.rotary_ndims;

        let cos = self
            .cos
            .narrow(0, 0, seq_len)?
            .reshape((1, 1, seq_len, self.rotary_ndims))?;
        let sin = self
            .sin
            .narrow(0, 0, seq_len)?
            .reshape((1, 1, seq_len, self.rotary_ndims))?;

        let rotate = |x: &Tensor| -> Result<Tensor> {
            let x_rot = x.narrow(3, 0, self.rotary_ndims)?;
            let rotated = (x_rot.broadcast_mul(&cos)?
                + Self::rotate_half(&x_rot)?.broadcast_mul(&sin)?)?;
            if pass_dims == 0 {
                Ok(rotated)
            } else {
                let x_pass = x.narrow(3, self.rotary_ndims, pass_dims)?;
                Ok(Tensor::cat(&[&rotated, &x_pass], 3)?)
            }
        };

        Ok((rotate(q)?, rotate(k)?))
    }
}

struct Attention {
    query_key_value: Linear,
    dense: Linear,
    num_heads: usize,
    head_dim: usize,
    hidden_size: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &NeoXConfig) -> Result<Self> {
        let query_key_value = linear(
            config.hidden_size,
            3 * config.hidden_size,
            vb.pp("query_key_value"),
        )?;
        let dense = linear(config.hidden_size, config.hidden_size, vb.pp("dense"))?;
        Ok(Self {
            query_key_value,
            dense,
            num_heads: config.num_attention_heads,
            head_dim: config.hidden_size / config.num_attention_heads,
            hidden_size: config.hidden_size,
        })
    }

    /// Forward pass that also returns attention weights
    ///
    /// Returns `(output, attention)` where attention is `[batch, heads, seq, seq]`
    fn forward_with_attn(&self, x: &Tensor, rotary: &RotaryEmbedding) -> Result<(Tensor, Tensor)> {
        let (b, seq_len, _) = x.dims3()?;

        // The fused projection is interleaved per head: [q | k | v] within
        // each head's 3*head_dim slice.
        let qkv = self
            .query_key_value
            .forward(x)?
            .reshape((b, seq_len, self.num_heads, 3 * self.head_dim))?;
        let q = qkv
            .narrow(3, 0, self.head_dim)?
            .transpose(1, 2)?
            .contiguous()?;
        let k = qkv
            .narrow(3, self.head_dim, self.head_dim)?
            .transpose(1, 2)?
            .contiguous()?;
        let v = qkv
            .narrow(3, 2 * self.head_dim, self.head_dim)?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, k) = rotary.apply(&q, &k)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let attn_weights = (q.contiguous()?.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;
        let mask = create_causal_mask(seq_len, x.device(), x.dtype())?;
        let attn_weights = attn_weights.broadcast_add(&mask)?;
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;

        let attn_output = attn_weights.matmul(&v)?;
        let attn_output = attn_output
            .transpose(1, 2)?
            .reshape((b, seq_len, self.hidden_size))?;

        Ok((self.dense.forward(&attn_output)?, attn_weights))
    }
}

struct Mlp {
    dense_h_to_4h: Linear,
    dense_4h_to_h: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &NeoXConfig) -> Result<Self> {
        let dense_h_to_4h = linear(
            config.hidden_size,
            4 * config.hidden_size,
            vb.pp("dense_h_to_4h"),
        )?;
        let dense_4h_to_h = linear(
            4 * config.hidden_size,
            config.hidden_size,
            vb.pp("dense_4h_to_h"),
        )?;
        Ok(Self {
            dense_h_to_4h,
            dense_4h_to_h,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.dense_h_to_4h.forward(x)?.gelu()?;
        Ok(self.dense_4h_to_h.forward(&x)?)
    }
}

struct Layer {
    input_layernorm: LayerNorm,
    post_attention_layernorm: LayerNorm,
    attention: Attention,
    mlp: Mlp,
    use_parallel_residual: bool,
}

impl Layer {
    fn load(vb: VarBuilder, config: &NeoXConfig) -> Result<Self> {
        let input_layernorm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("input_layernorm"),
        )?;
        let post_attention_layernorm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("post_attention_layernorm"),
        )?;
        let attention = Attention::load(vb.pp("attention"), config)?;
        let mlp = Mlp::load(vb.pp("mlp"), config)?;
        Ok(Self {
            input_layernorm,
            post_attention_layernorm,
            attention,
            mlp,
            use_parallel_residual: config.use_parallel_residual,
        })
    }

    fn forward_with_attn(&self, x: &Tensor, rotary: &RotaryEmbedding) -> Result<(Tensor, Tensor)> {
        let (attn_out, attn_weights) = self
            .attention
            .forward_with_attn(&self.input_layernorm.forward(x)?, rotary)?;

        let x = if self.use_parallel_residual {
            let mlp_out = self.mlp.forward(&self.post_attention_layernorm.forward(x)?)?;
            ((x + attn_out)? + mlp_out)?
        } else {
            let x = (x + attn_out)?;
            let mlp_out = self
                .mlp
                .forward(&self.post_attention_layernorm.forward(&x)?)?;
            (x + mlp_out)?
        };

        Ok((x, attn_weights))
    }
}

/// GPT-NeoX transformer stack with attention capture
pub struct NeoXModel {
    embed_in: Embedding,
    layers: Vec<Layer>,
    rotary: RotaryEmbedding,
    n_layers: usize,
    n_heads: usize,
}

impl NeoXModel {
    /// Load from a HuggingFace repository
    pub fn load(hub_id: &str, device: &Device) -> Result<Self> {
        info!("Loading GPT-NeoX from: {}", hub_id);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(hub_id.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let config_str = std::fs::read_to_string(&config_path).context("Failed to read config")?;
        let config: NeoXConfig = serde_json::from_str(&config_str)?;

        info!(
            "Model config: {} layers, {} heads, {} hidden, {} vocab",
            config.num_hidden_layers,
            config.num_attention_heads,
            config.hidden_size,
            config.vocab_size
        );

        // Sharded vs single safetensors
        let weights_paths = if let Ok(index_path) = repo.get("model.safetensors.index.json") {
            info!("Model is sharded, loading index...");
            let index_str = std::fs::read_to_string(&index_path).context("Failed to read index")?;
            let index: SafetensorsIndex = serde_json::from_str(&index_str)?;

            let mut shard_names: Vec<String> = index.weight_map.values().cloned().collect();
            shard_names.sort();
            shard_names.dedup();

            info!("Downloading {} shard files...", shard_names.len());
            let mut paths = Vec::new();
            for shard_name in &shard_names {
                let path = repo
                    .get(shard_name)
                    .with_context(|| format!("Failed to download {shard_name}"))?;
                paths.push(path);
            }
            paths
        } else {
            let path = repo
                .get("model.safetensors")
                .context("Failed to download model.safetensors")?;
            vec![path]
        };

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&weights_paths, DType::F32, device)? };
        let vb_model = if vb.contains_tensor("embed_in.weight") {
            vb
        } else {
            vb.pp("gpt_neox")
        };

        let embed_in = embedding(config.vocab_size, config.hidden_size, vb_model.pp("embed_in"))?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            if (i + 1) % 10 == 0 || i == 0 {
                info!("Loading layer {}/{}", i + 1, config.num_hidden_layers);
            }
            let layer = Layer::load(vb_model.pp(format!("layers.{i}")), &config)?;
            layers.push(layer);
        }

        let head_dim = config.hidden_size / config.num_attention_heads;
        let rotary_ndims = (head_dim as f64 * config.rotary_pct) as usize;
        let rotary = RotaryEmbedding::new(
            rotary_ndims,
            config.max_position_embeddings,
            config.rotary_emb_base,
            device,
        )?;

        info!(
            "Model loaded successfully with {} layers (rotary dims: {})",
            config.num_hidden_layers, rotary_ndims
        );

        Ok(Self {
            embed_in,
            layers,
            rotary,
            n_layers: config.num_hidden_layers,
            n_heads: config.num_attention_heads,
        })
    }
}

impl AttentionBackend for NeoXModel {
    fn n_layers(&self) -> usize {
        self.n_layers
    }

    fn n_heads(&self) -> usize {
        self.n_heads
    }

    fn bos_token_id(&self) -> u32 {
        NEOX_BOS_TOKEN_ID
    }

    fn forward_with_attention(&self, input_ids: &Tensor) -> Result<AttentionCapture> {
        let mut capture = AttentionCapture::with_capacity(self.n_layers);

        let mut hidden = self.embed_in.forward(input_ids)?;
        for layer in &self.layers {
            let (new_hidden, attn_weights) = layer.forward_with_attn(&hidden, &self.rotary)?;
            hidden = new_hidden;
            capture.push(attn_weights);
        }

        // final_layer_norm is skipped: it only affects logits
        Ok(capture)
    }
}
