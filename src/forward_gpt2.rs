//! GPT-2 forward pass with attention capture.
//!
//! Loads HuggingFace GPT-2 checkpoints (learned positional embeddings,
//! fused QKV stored as Conv1D weights) and runs the transformer stack while
//! recording the post-softmax attention probabilities of every layer. The
//! language-model head is never needed here; only the attention patterns
//! leave this module.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{embedding, layer_norm, Embedding, LayerNorm, Linear, Module, VarBuilder};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::Deserialize;
use tracing::info;

use crate::capture::AttentionCapture;
use crate::extractor::AttentionBackend;
use crate::masks::create_causal_mask;

/// GPT-2 end-of-text token, used as the BOS sentinel
const GPT2_BOS_TOKEN_ID: u32 = 50256;

fn default_ln_eps() -> f64 {
    1e-5
}

#[derive(Debug, Deserialize)]
struct Gpt2Config {
    n_layer: usize,
    n_head: usize,
    n_embd: usize,
    vocab_size: usize,
    n_positions: usize,
    #[serde(default = "default_ln_eps")]
    layer_norm_epsilon: f64,
}

/// Load a Conv1D weight (stored `[in, out]`) as a Linear layer
fn conv1d_as_linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get((in_dim, out_dim), "weight")?.t()?.contiguous()?;
    let bias = vb.get(out_dim, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

struct Attention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    head_dim: usize,
    n_embd: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &Gpt2Config) -> Result<Self> {
        let c_attn = conv1d_as_linear(config.n_embd, 3 * config.n_embd, vb.pp("c_attn"))?;
        let c_proj = conv1d_as_linear(config.n_embd, config.n_embd, vb.pp("c_proj"))?;
        Ok(Self {
            c_attn,
            c_proj,
            n_head: config.n_head,
            head_dim: config.n_embd / config.n_head,
            n_embd: config.n_embd,
        })
    }

    /// Forward pass that also returns attention weights
    ///
    /// Returns `(output, attention)` where attention is `[batch, heads, seq, seq]`
    fn forward_with_attn(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let (b, seq_len, _) = x.dims3()?;

        let qkv = self.c_attn.forward(x)?;
        let q = qkv.narrow(2, 0, self.n_embd)?;
        let k = qkv.narrow(2, self.n_embd, self.n_embd)?;
        let v = qkv.narrow(2, 2 * self.n_embd, self.n_embd)?;

        // Reshape for multi-head attention: [batch, heads, seq, head_dim]
        let q = q
            .reshape((b, seq_len, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k
            .reshape((b, seq_len, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v
            .reshape((b, seq_len, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        // Scaled dot-product attention with causal mask
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let attn_weights = (q.matmul(&k.transpose(2, 3)?)? * scale)?;
        let mask = create_causal_mask(seq_len, x.device(), x.dtype())?;
        let attn_weights = attn_weights.broadcast_add(&mask)?;
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;

        let attn_output = attn_weights.matmul(&v)?;
        let attn_output = attn_output
            .transpose(1, 2)?
            .reshape((b, seq_len, self.n_embd))?;

        Ok((self.c_proj.forward(&attn_output)?, attn_weights))
    }
}

struct Mlp {
    c_fc: Linear,
    c_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &Gpt2Config) -> Result<Self> {
        let c_fc = conv1d_as_linear(config.n_embd, 4 * config.n_embd, vb.pp("c_fc"))?;
        let c_proj = conv1d_as_linear(4 * config.n_embd, config.n_embd, vb.pp("c_proj"))?;
        Ok(Self { c_fc, c_proj })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.c_fc.forward(x)?.gelu()?;
        Ok(self.c_proj.forward(&x)?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(vb: VarBuilder, config: &Gpt2Config) -> Result<Self> {
        let ln_1 = layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_1"))?;
        let attn = Attention::load(vb.pp("attn"), config)?;
        let ln_2 = layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_2"))?;
        let mlp = Mlp::load(vb.pp("mlp"), config)?;
        Ok(Self {
            ln_1,
            attn,
            ln_2,
            mlp,
        })
    }

    /// Pre-norm residual block, returning the attention weights
    fn forward_with_attn(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let residual = x;
        let (attn_out, attn_weights) = self.attn.forward_with_attn(&self.ln_1.forward(x)?)?;
        let x = (residual + attn_out)?;

        let residual = &x;
        let mlp_out = self.mlp.forward(&self.ln_2.forward(&x)?)?;
        let x = (residual + mlp_out)?;

        Ok((x, attn_weights))
    }
}

/// GPT-2 transformer stack with attention capture
pub struct Gpt2Model {
    wte: Embedding,
    wpe: Tensor,
    blocks: Vec<Block>,
    n_layer: usize,
    n_head: usize,
}

impl Gpt2Model {
    /// Load from a HuggingFace repository
    pub fn load(hub_id: &str, device: &Device) -> Result<Self> {
        info!("Loading GPT-2 from: {}", hub_id);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(hub_id.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let config_str = std::fs::read_to_string(&config_path).context("Failed to read config")?;
        let config: Gpt2Config = serde_json::from_str(&config_str)?;

        info!(
            "Model config: {} layers, {} heads, {} hidden, {} vocab",
            config.n_layer, config.n_head, config.n_embd, config.vocab_size
        );

        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)? };

        // Checkpoints exported from GPT2LMHeadModel nest everything under
        // "transformer"; bare GPT2Model checkpoints do not.
        let vb = if vb.contains_tensor("wte.weight") {
            vb
        } else {
            vb.pp("transformer")
        };

        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = vb
            .pp("wpe")
            .get((config.n_positions, config.n_embd), "weight")?;

        let mut blocks = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            let block = Block::load(vb.pp(format!("h.{i}")), &config)?;
            blocks.push(block);
        }

        info!("Model loaded successfully with {} layers", config.n_layer);

        Ok(Self {
            wte,
            wpe,
            blocks,
            n_layer: config.n_layer,
            n_head: config.n_head,
        })
    }
}

impl AttentionBackend for Gpt2Model {
    fn n_layers(&self) -> usize {
        self.n_layer
    }

    fn n_heads(&self) -> usize {
        self.n_head
    }

    fn bos_token_id(&self) -> u32 {
        GPT2_BOS_TOKEN_ID
    }

    fn forward_with_attention(&self, input_ids: &Tensor) -> Result<AttentionCapture> {
        let mut capture = AttentionCapture::with_capacity(self.n_layer);

        let seq_len = input_ids.dim(1)?;
        let positions = self.wpe.narrow(0, 0, seq_len)?;
        let mut hidden = self.wte.forward(input_ids)?.broadcast_add(&positions)?;

        for block in &self.blocks {
            let (new_hidden, attn_weights) = block.forward_with_attn(&hidden)?;
            hidden = new_hidden;
            capture.push(attn_weights);
        }

        // ln_f is skipped: it only affects logits, not the captured patterns
        Ok(capture)
    }
}
