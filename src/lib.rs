// Pedantic clippy configuration for ML/math codebase
// These are acceptable in numerical/ML code:
#![allow(clippy::cast_precision_loss)] // usize→f64/f32 intentional in ML
#![allow(clippy::cast_possible_truncation)] // usize→u32 in tensor indexing
#![allow(clippy::many_single_char_names)] // x, y, i, j standard in math
#![allow(clippy::similar_names)] // related variables like `head`/`heads`
#![allow(clippy::module_name_repetitions)] // Gpt2Model in forward_gpt2.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns

//! attnflow-rs: attention flow extraction and visualization
//!
//! Extracts per-head attention weight matrices from a transformer language
//! model, flattens them into a canonical edge list, and turns that list plus
//! user-defined head groupings into a drawable layer × token graph scene.
//!
//! ## Architecture
//!
//! - `catalog`: Static model registry (shapes, default probe texts, predefined head groups)
//! - `capture`: Per-layer attention tensor capture during a forward pass
//! - `forward_gpt2`: GPT-2 forward pass with attention capture
//! - `forward_neox`: GPT-NeoX/Pythia forward pass with attention capture
//! - `masks`: Causal attention mask shared by the forward passes
//! - `extractor`: Tokenize, run forward, trim the BOS sentinel
//! - `edges`: Flatten attention tensors into the canonical edge record list
//! - `groups`: Head groups and individual head selections (session-scoped)
//! - `render`: Pure edge-list + groups + threshold → scene function
//! - `session`: Dashboard session state and orchestration
//! - `wire`: Request/response shapes shared by server, client and sample files
//! - `client`: Blocking HTTP client for the `/process` backend
//! - `sample`: Sample-data cache files (offline fallback)
//! - `service`: HTTP backend exposing `/process` and `/health`

pub mod capture;
pub mod catalog;
pub mod client;
pub mod edges;
pub mod extractor;
pub mod forward_gpt2;
pub mod forward_neox;
pub mod groups;
pub mod masks;
pub mod render;
pub mod sample;
pub mod service;
pub mod session;
pub mod wire;

pub use capture::AttentionCapture;
pub use catalog::{Catalog, ModelInfo, PredefinedGroup};
pub use client::{ApiClient, ClientError};
pub use edges::{build, AttentionPattern, HeadTypeMap, UNKNOWN_HEAD_TYPE};
pub use extractor::{
    AttentionBackend, AttentionTensor, ExtractError, Extractor, ModelArchitecture,
};
pub use forward_gpt2::Gpt2Model;
pub use forward_neox::NeoXModel;
pub use groups::{
    color_for_pair, random_palette_color, GroupError, HeadGroup, HeadPair, HeadRegistry,
    COLOR_PALETTE, DEFAULT_HEAD_COLOR,
};
pub use render::{render, CurveStyle, GridNode, LegendEntry, Scene, SceneEdge};
pub use service::ServiceConfig;
pub use session::Session;
pub use wire::{HealthResponse, ModelSummary, ProcessRequest, ProcessResponse};
