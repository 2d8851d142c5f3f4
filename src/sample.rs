//! Sample-data cache: `/process` responses persisted as JSON files so the
//! dashboard can run without a live backend.
//!
//! One file per model, `sample-attention-<model>.json`, containing exactly
//! the `/process` response shape. Loadable without the extractor.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::wire::ProcessResponse;

/// Path of the sample file for a model inside `dir`
pub fn sample_path(dir: impl AsRef<Path>, model_id: &str) -> PathBuf {
    dir.as_ref().join(format!("sample-attention-{model_id}.json"))
}

/// Load the cached sample response for a model
pub fn load_sample(dir: impl AsRef<Path>, model_id: &str) -> Result<ProcessResponse> {
    let path = sample_path(dir, model_id);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read sample data file {}", path.display()))?;
    let response: ProcessResponse = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse sample data file {}", path.display()))?;
    Ok(response)
}

/// Write a response as the sample file for its model, returning the path
pub fn write_sample(dir: impl AsRef<Path>, response: &ProcessResponse) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create sample data directory {}", dir.display()))?;
    let path = sample_path(dir, &response.model_name);
    let content = serde_json::to_string_pretty(response)?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write sample data file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::AttentionTensor;
    use crate::wire::{ModelSummary, ProcessResponse};

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tokens: Vec<String> = (0..2).map(|i| format!("t{i}")).collect();
        let tensor = AttentionTensor::from_fn(2, 2, 2, |_, _, d, s| if d == s { 0.9 } else { 0.1 });
        let info = ModelSummary {
            name: "gpt2-small".to_string(),
            layers: 2,
            heads: 2,
        };
        let response = ProcessResponse::from_extraction(info, tokens, &tensor, None);

        let path = write_sample(dir.path(), &response).unwrap();
        assert_eq!(path, sample_path(dir.path(), "gpt2-small"));

        let loaded = load_sample(dir.path(), "gpt2-small").unwrap();
        assert_eq!(loaded.num_layers, 3);
        assert_eq!(loaded.attention_patterns.len(), 16);
        assert_eq!(loaded.attention_patterns, response.attention_patterns);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_sample(dir.path(), "gpt2-small").is_err());
    }
}
