//! Attention extraction: tokenize a text, run the model forward pass with
//! attention capture, and trim the BOS sentinel from the result.
//!
//! ## Sentinel policy
//!
//! Every input is prepended with the model's beginning-of-sequence token
//! before the forward pass. The sentinel is then stripped from the returned
//! token list and trimmed from both axes of the attention tensor. Rows are
//! NOT renormalized after trimming; the sentinel's attention mass is simply
//! dropped. Empty (or whitespace-only) input is rejected with
//! [`ExtractError::EmptyInput`] rather than producing a degenerate
//! one-token result.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use thiserror::Error;
use tokenizers::Tokenizer;
use tracing::info;

use crate::capture::AttentionCapture;
use crate::catalog::Catalog;
use crate::forward_gpt2::Gpt2Model;
use crate::forward_neox::NeoXModel;

/// Extraction failures, surfaced to the HTTP boundary
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Model id is not in the catalog
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    /// Input text is empty after trimming
    #[error("input text is empty")]
    EmptyInput,
    /// The underlying model failed to load or run; not retryable here
    #[error("model execution failed: {0}")]
    ModelExecution(anyhow::Error),
}

/// Supported model architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelArchitecture {
    /// GPT-2 family (learned positional embeddings, fused QKV Conv1D)
    Gpt2,
    /// GPT-NeoX family: Pythia (rotary embeddings, parallel residual)
    NeoX,
}

impl ModelArchitecture {
    /// Detect architecture from a catalog or hub id
    pub fn from_model_id(model_id: &str) -> Self {
        let model_lower = model_id.to_lowercase();
        if model_lower.contains("pythia") || model_lower.contains("neox") {
            ModelArchitecture::NeoX
        } else {
            ModelArchitecture::Gpt2
        }
    }
}

/// Dense 4D attention weights for one processed text, sentinel already
/// trimmed. Indexed `[layer][head][dest][src]`, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionTensor {
    layers: usize,
    heads: usize,
    n_tokens: usize,
    data: Vec<f32>,
}

impl AttentionTensor {
    /// Build from a flat buffer laid out layer-major, then head, dest, src
    pub fn new(layers: usize, heads: usize, n_tokens: usize, data: Vec<f32>) -> Result<Self> {
        let expected = layers * heads * n_tokens * n_tokens;
        if data.len() != expected {
            return Err(anyhow!(
                "attention buffer has {} values, expected {} ({}x{}x{}x{})",
                data.len(),
                expected,
                layers,
                heads,
                n_tokens,
                n_tokens
            ));
        }
        Ok(Self {
            layers,
            heads,
            n_tokens,
            data,
        })
    }

    /// Build by evaluating `f(layer, head, dest, src)` over the full grid
    pub fn from_fn(
        layers: usize,
        heads: usize,
        n_tokens: usize,
        mut f: impl FnMut(usize, usize, usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(layers * heads * n_tokens * n_tokens);
        for layer in 0..layers {
            for head in 0..heads {
                for dest in 0..n_tokens {
                    for src in 0..n_tokens {
                        data.push(f(layer, head, dest, src));
                    }
                }
            }
        }
        Self {
            layers,
            heads,
            n_tokens,
            data,
        }
    }

    /// Weight at `[layer][head][dest][src]`
    pub fn get(&self, layer: usize, head: usize, dest: usize, src: usize) -> f32 {
        let n = self.n_tokens;
        self.data[((layer * self.heads + head) * n + dest) * n + src]
    }

    /// `(layers, heads, n_tokens, n_tokens)`
    pub fn dims(&self) -> (usize, usize, usize, usize) {
        (self.layers, self.heads, self.n_tokens, self.n_tokens)
    }

    pub fn n_layers(&self) -> usize {
        self.layers
    }

    pub fn n_heads(&self) -> usize {
        self.heads
    }

    pub fn n_tokens(&self) -> usize {
        self.n_tokens
    }
}

/// Unified backend interface: run a forward pass and capture the
/// post-softmax attention probabilities of every layer.
///
/// Implementing this trait is the only requirement for adding a new model
/// architecture. The extractor never needs to know how a backend intercepts
/// its attention internally.
pub trait AttentionBackend: Send + Sync {
    fn n_layers(&self) -> usize;
    fn n_heads(&self) -> usize;
    /// Sentinel token prepended to every input
    fn bos_token_id(&self) -> u32;
    /// Full forward pass; returns one `[batch, heads, seq, seq]` tensor per layer
    fn forward_with_attention(&self, input_ids: &Tensor) -> Result<AttentionCapture>;
}

/// Reject empty or whitespace-only input before any model work, returning
/// the trimmed text otherwise. Runs ahead of tokenization so a bare
/// sentinel never reaches the forward pass.
fn validate_input(text: &str) -> Result<&str, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::EmptyInput);
    }
    Ok(trimmed)
}

/// High-level extractor: owns a loaded backend and its tokenizer
pub struct Extractor {
    backend: Box<dyn AttentionBackend>,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

impl Extractor {
    /// Load the backend for a catalog model (tries CUDA, falls back to CPU)
    pub fn load(catalog: &Catalog, model_id: &str) -> Result<Self, ExtractError> {
        let info = catalog
            .get(model_id)
            .ok_or_else(|| ExtractError::UnknownModel(model_id.to_string()))?;

        Self::load_from_hub(&info.hub_id, model_id).map_err(ExtractError::ModelExecution)
    }

    fn load_from_hub(hub_id: &str, model_id: &str) -> Result<Self> {
        let device = match Device::cuda_if_available(0) {
            Ok(dev) if dev.is_cuda() => {
                info!("Using CUDA device");
                dev
            }
            _ => {
                info!("CUDA not available, using CPU");
                Device::Cpu
            }
        };

        let architecture = ModelArchitecture::from_model_id(model_id);
        info!("Loading model: {} ({:?})", hub_id, architecture);

        let api = Api::new()?;
        let repo = api.repo(Repo::new(hub_id.to_string(), RepoType::Model));
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Tokenizer error: {e}"))?;

        let backend: Box<dyn AttentionBackend> = match architecture {
            ModelArchitecture::Gpt2 => Box::new(Gpt2Model::load(hub_id, &device)?),
            ModelArchitecture::NeoX => Box::new(NeoXModel::load(hub_id, &device)?),
        };

        info!(
            "Model loaded: {} layers, {} heads",
            backend.n_layers(),
            backend.n_heads()
        );

        Ok(Self {
            backend,
            tokenizer,
            device,
            model_id: model_id.to_string(),
        })
    }

    /// Catalog id this extractor was loaded for
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn n_layers(&self) -> usize {
        self.backend.n_layers()
    }

    pub fn n_heads(&self) -> usize {
        self.backend.n_heads()
    }

    /// Tokenize `text`, run the forward pass and return the trimmed tokens
    /// and attention tensor.
    ///
    /// Guarantee: `tensor.dims() == (n_layers, n_heads, tokens.len(), tokens.len())`.
    /// This is the only slow (seconds) operation in the core; callers should
    /// treat it as blocking work.
    pub fn extract(&self, text: &str) -> Result<(Vec<String>, AttentionTensor), ExtractError> {
        let trimmed = validate_input(text)?;
        self.run(trimmed).map_err(ExtractError::ModelExecution)
    }

    fn run(&self, text: &str) -> Result<(Vec<String>, AttentionTensor)> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenization error: {e}"))?;

        let mut input_ids = vec![self.backend.bos_token_id()];
        input_ids.extend_from_slice(encoding.get_ids());
        let seq_len = input_ids.len();

        let input_tensor = Tensor::new(&input_ids[..], &self.device)?.unsqueeze(0)?;
        let capture = self.backend.forward_with_attention(&input_tensor)?;

        if capture.n_layers() != self.backend.n_layers() {
            return Err(anyhow!(
                "captured {} layers, expected {}",
                capture.n_layers(),
                self.backend.n_layers()
            ));
        }

        // Strip the sentinel: tokens drop position 0, the tensor drops row
        // and column 0 of every [dest, src] slice. No renormalization.
        let n_tokens = seq_len - 1;
        let heads = self.backend.n_heads();
        let mut data = Vec::with_capacity(capture.n_layers() * heads * n_tokens * n_tokens);
        for pattern in capture.layers() {
            let trimmed = pattern
                .to_dtype(DType::F32)?
                .i((0, .., 1.., 1..))?
                .contiguous()?;
            let flat: Vec<f32> = trimmed.flatten_all()?.to_vec1()?;
            data.extend_from_slice(&flat);
        }
        let tensor = AttentionTensor::new(capture.n_layers(), heads, n_tokens, data)?;

        let tokens: Vec<String> = input_ids[1..]
            .iter()
            .map(|&id| self.decode_token(id))
            .collect();

        Ok((tokens, tensor))
    }

    /// Decode a single token id to its display string
    fn decode_token(&self, token_id: u32) -> String {
        self.tokenizer
            .decode(&[token_id], false)
            .unwrap_or_else(|_| format!("<{token_id}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_architecture_detection() {
        assert_eq!(
            ModelArchitecture::from_model_id("gpt2-small"),
            ModelArchitecture::Gpt2
        );
        assert_eq!(
            ModelArchitecture::from_model_id("pythia-2.8b"),
            ModelArchitecture::NeoX
        );
        assert_eq!(
            ModelArchitecture::from_model_id("EleutherAI/gpt-neox-20b"),
            ModelArchitecture::NeoX
        );
    }

    #[test]
    fn test_tensor_indexing() {
        let tensor = AttentionTensor::from_fn(2, 3, 4, |l, h, d, s| {
            (l * 1000 + h * 100 + d * 10 + s) as f32
        });
        assert_eq!(tensor.dims(), (2, 3, 4, 4));
        assert_eq!(tensor.get(0, 0, 0, 0), 0.0);
        assert_eq!(tensor.get(1, 2, 3, 1), 1231.0);
    }

    #[test]
    fn test_tensor_rejects_bad_buffer() {
        assert!(AttentionTensor::new(2, 2, 2, vec![0.0; 7]).is_err());
        assert!(AttentionTensor::new(2, 2, 2, vec![0.0; 16]).is_ok());
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(validate_input(""), Err(ExtractError::EmptyInput)));
        assert!(matches!(
            validate_input("   \t\n"),
            Err(ExtractError::EmptyInput)
        ));
        assert_eq!(validate_input("  hello  ").unwrap(), "hello");
    }

    #[test]
    fn test_unknown_model_error() {
        let catalog = Catalog::builtin();
        let err = Extractor::load(&catalog, "no-such-model").unwrap_err();
        assert!(matches!(err, ExtractError::UnknownModel(_)));
    }
}
