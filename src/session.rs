//! Dashboard session: one value owning all mutable UI state.
//!
//! A session holds the active model, the probe text, the head registry, the
//! display threshold and the last processed result. Each session owns one
//! instance, created at session start and dropped at session end; only the
//! catalog is shared read-only.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::client::ApiClient;
use crate::groups::{GroupError, HeadRegistry};
use crate::render::{render, CurveStyle, Scene};
use crate::sample;
use crate::wire::ProcessResponse;

const DEFAULT_THRESHOLD: f32 = 0.4;

/// Process-local session state for one dashboard user
pub struct Session {
    catalog: Catalog,
    client: ApiClient,
    sample_dir: PathBuf,
    model_id: String,
    input_text: String,
    threshold: f32,
    curve_style: CurveStyle,
    registry: HeadRegistry,
    data: Option<ProcessResponse>,
}

impl Session {
    /// Start a session on the given model
    pub fn new(
        catalog: Catalog,
        client: ApiClient,
        sample_dir: impl Into<PathBuf>,
        model_id: &str,
    ) -> Result<Self> {
        let info = catalog
            .get(model_id)
            .ok_or_else(|| anyhow!("unknown model '{model_id}'"))?;
        let input_text = info.default_text.clone();
        let registry = HeadRegistry::from_predefined(catalog.predefined_groups(model_id));

        Ok(Self {
            catalog,
            client,
            sample_dir: sample_dir.into(),
            model_id: model_id.to_string(),
            input_text,
            threshold: DEFAULT_THRESHOLD,
            curve_style: CurveStyle::default(),
            registry,
            data: None,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    pub fn set_input_text(&mut self, text: impl Into<String>) {
        self.input_text = text.into();
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn curve_style(&self) -> CurveStyle {
        self.curve_style
    }

    pub fn set_curve_style(&mut self, style: CurveStyle) {
        self.curve_style = style;
    }

    /// Head groups and selections of this session
    pub fn registry(&self) -> &HeadRegistry {
        &self.registry
    }

    /// Mutable access for group operations that need no model dimensions
    pub fn registry_mut(&mut self) -> &mut HeadRegistry {
        &mut self.registry
    }

    /// Last processed result, if any
    pub fn data(&self) -> Option<&ProcessResponse> {
        self.data.as_ref()
    }

    /// Switch the active model: resets groups to the model's predefined
    /// defaults, resets the probe text and drops the cached result.
    pub fn set_model(&mut self, model_id: &str) -> Result<()> {
        let info = self
            .catalog
            .get(model_id)
            .ok_or_else(|| anyhow!("unknown model '{model_id}'"))?;
        self.model_id = model_id.to_string();
        self.input_text = info.default_text.clone();
        self.registry = HeadRegistry::from_predefined(self.catalog.predefined_groups(model_id));
        self.data = None;
        info!("Switched to model {model_id}");
        Ok(())
    }

    /// Add individual head selections, validated against the active model's
    /// dimensions. A failed call leaves the selection list untouched.
    pub fn add_selection(&mut self, spec: &str) -> Result<usize, GroupError> {
        let info = self
            .catalog
            .get(&self.model_id)
            .expect("active model is always in the catalog");
        self.registry
            .add_selection(spec, info.layers, info.heads)
    }

    /// Process the current input text through the backend.
    ///
    /// Connectivity failures and backend execution failures fall back to the
    /// sample-data cache with a warning; bad-input errors (empty text,
    /// unknown model) are surfaced to the caller verbatim.
    pub fn process(&mut self) -> Result<()> {
        match self.client.process_text(&self.input_text, &self.model_id) {
            Ok(response) => {
                self.data = Some(response);
                Ok(())
            }
            Err(err) if err.is_fallback() => {
                warn!("Backend unavailable ({err}), using sample data");
                let response = sample::load_sample(&self.sample_dir, &self.model_id)
                    .context("backend unavailable and no sample data found")?;
                self.data = Some(response);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Render the current result into a drawable scene.
    ///
    /// Returns `None` until a result has been processed.
    pub fn scene(&self) -> Option<Scene> {
        self.data.as_ref().map(|data| {
            let mut scene = render(
                &data.attention_patterns,
                self.registry.groups(),
                self.registry.selections(),
                self.threshold,
            );
            scene.curve_style = self.curve_style;
            scene
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::AttentionTensor;
    use crate::wire::{ModelSummary, ProcessResponse};

    fn offline_session(dir: &std::path::Path) -> Session {
        // Port 9 is discard; nothing answers, so process() exercises fallback
        let client = ApiClient::new("http://127.0.0.1:9");
        Session::new(Catalog::builtin(), client, dir, "gpt2-small").unwrap()
    }

    fn sample_response() -> ProcessResponse {
        let tokens: Vec<String> = (0..3).map(|i| format!("t{i}")).collect();
        let tensor = AttentionTensor::from_fn(12, 12, 3, |_, _, _, _| 0.5);
        ProcessResponse::from_extraction(
            ModelSummary {
                name: "gpt2-small".to_string(),
                layers: 12,
                heads: 12,
            },
            tokens,
            &tensor,
            None,
        )
    }

    #[test]
    fn test_new_seeds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let session = offline_session(dir.path());
        assert_eq!(session.model_id(), "gpt2-small");
        assert_eq!(
            session.input_text(),
            "When Mary and John went the store, John gave a drink to"
        );
        // IOI circuit groups are preloaded
        assert_eq!(session.registry().groups().len(), 7);
        assert!(session.data().is_none());
        assert!(session.scene().is_none());
    }

    #[test]
    fn test_set_model_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = offline_session(dir.path());
        session.add_selection("1,2").unwrap();
        session.set_input_text("custom text");

        session.set_model("pythia-2.8b").unwrap();
        assert_eq!(session.registry().groups().len(), 3);
        assert!(session.registry().selections().is_empty());
        assert_eq!(
            session.input_text(),
            "The quick brown fox jumps over the lazy dog"
        );

        assert!(session.set_model("missing").is_err());
    }

    #[test]
    fn test_selection_bounds_follow_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = offline_session(dir.path());
        // gpt2-small has 12 layers
        assert!(session.add_selection("13,0").is_err());
        session.set_model("pythia-2.8b").unwrap();
        // pythia-2.8b has 32
        assert_eq!(session.add_selection("13,0").unwrap(), 1);
    }

    #[test]
    fn test_process_falls_back_to_sample_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = offline_session(dir.path());

        // No sample file: fallback fails loudly
        assert!(session.process().is_err());

        sample::write_sample(dir.path(), &sample_response()).unwrap();
        session.process().unwrap();
        let data = session.data().unwrap();
        assert_eq!(data.num_tokens, 3);

        let scene = session.scene().unwrap();
        // 13 grid levels x 3 tokens
        assert_eq!(scene.nodes.len(), 39);
    }
}
