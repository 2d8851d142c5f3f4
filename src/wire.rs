//! Request/response shapes shared by the HTTP service, the client and the
//! sample-data files.
//!
//! The JSON field names are part of the external contract: pattern fields
//! are camelCase, while `model_name` and `model_info` stay snake_case.

use serde::{Deserialize, Serialize};

use crate::edges::{self, AttentionPattern, HeadTypeMap};
use crate::extractor::AttentionTensor;

/// Body of `POST /process`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub text: String,
    pub model_name: String,
}

/// `model_info` block of the `/process` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub layers: usize,
    pub heads: usize,
}

/// Response of `POST /process`; also the sample-data file format.
///
/// `num_layers` counts grid levels, not model layers: it is
/// `model layers + 1` because the top level exists only as an edge
/// destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub num_layers: usize,
    pub num_tokens: usize,
    pub num_heads: usize,
    pub tokens: Vec<String>,
    pub attention_patterns: Vec<AttentionPattern>,
    #[serde(rename = "model_name")]
    pub model_name: String,
    #[serde(rename = "model_info")]
    pub model_info: ModelSummary,
}

impl ProcessResponse {
    /// Assemble the full response from an extraction result
    pub fn from_extraction(
        model_info: ModelSummary,
        tokens: Vec<String>,
        tensor: &AttentionTensor,
        head_types: Option<&HeadTypeMap>,
    ) -> Self {
        let attention_patterns = edges::build(&tokens, tensor, head_types);
        Self {
            num_layers: model_info.layers + 1,
            num_tokens: tokens.len(),
            num_heads: model_info.heads,
            tokens,
            attention_patterns,
            model_name: model_info.name.clone(),
            model_info,
        }
    }
}

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_counts_and_field_names() {
        let tokens: Vec<String> = (0..6).map(|i| format!("t{i}")).collect();
        let tensor = AttentionTensor::from_fn(12, 12, 6, |_, _, _, _| 0.1);
        let info = ModelSummary {
            name: "gpt2-small".to_string(),
            layers: 12,
            heads: 12,
        };

        let response = ProcessResponse::from_extraction(info, tokens, &tensor, None);
        assert_eq!(response.num_layers, 13);
        assert_eq!(response.num_tokens, 6);
        assert_eq!(response.num_heads, 12);
        assert_eq!(response.attention_patterns.len(), 12 * 12 * 6 * 6);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("numLayers").is_some());
        assert!(json.get("attentionPatterns").is_some());
        assert!(json.get("model_name").is_some());
        assert_eq!(json["model_info"]["layers"], 12);
    }
}
