//! Model catalog: architectural shapes, default probe texts and predefined
//! head groups for the small fixed set of supported models.
//!
//! The catalog is immutable after construction and safe to share read-only
//! across sessions. The built-in entries cover GPT-2 small (with the IOI
//! circuit groups) and Pythia-2.8b (with the subject/relation groups); a JSON
//! file in the same shape can replace them entirely.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::edges::HeadTypeMap;
use crate::wire::ModelSummary;

/// Architectural shape and defaults for one catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Catalog identifier (e.g. "gpt2-small")
    pub name: String,
    /// HuggingFace repository the weights are loaded from
    pub hub_id: String,
    /// Number of transformer layers
    pub layers: usize,
    /// Number of attention heads per layer
    pub heads: usize,
    /// Default probe text shown when this model is selected
    pub default_text: String,
}

impl ModelInfo {
    /// Wire-format summary (`model_info` in the `/process` response)
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            name: self.name.clone(),
            layers: self.layers,
            heads: self.heads,
        }
    }
}

/// A predefined head group shipped with a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredefinedGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// (layer, head) pairs belonging to this group
    pub vertices: Vec<(usize, usize)>,
}

/// Raw JSON structure for loading a catalog from disk
#[derive(Debug, Deserialize)]
struct CatalogFile {
    models: Vec<ModelInfo>,
    #[serde(default)]
    groups: HashMap<String, Vec<PredefinedGroup>>,
}

/// Registry of supported models and their predefined head groups
#[derive(Debug, Clone)]
pub struct Catalog {
    models: Vec<ModelInfo>,
    groups: HashMap<String, Vec<PredefinedGroup>>,
}

impl Catalog {
    /// Catalog with the built-in model entries and head groups
    pub fn builtin() -> Self {
        let models = vec![
            ModelInfo {
                name: "gpt2-small".to_string(),
                hub_id: "gpt2".to_string(),
                layers: 12,
                heads: 12,
                default_text: "When Mary and John went the store, John gave a drink to"
                    .to_string(),
            },
            ModelInfo {
                name: "pythia-2.8b".to_string(),
                hub_id: "EleutherAI/pythia-2.8b".to_string(),
                layers: 32,
                heads: 32,
                default_text: "The quick brown fox jumps over the lazy dog".to_string(),
            },
        ];

        let mut groups = HashMap::new();
        groups.insert("gpt2-small".to_string(), gpt2_groups());
        groups.insert("pythia-2.8b".to_string(), pythia_groups());

        Self { models, groups }
    }

    /// Load a catalog from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog file {}", path.display()))?;
        Ok(Self {
            models: file.models,
            groups: file.groups,
        })
    }

    /// Look up a model by catalog id
    pub fn get(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.name == model_id)
    }

    /// All catalog ids, in declaration order
    pub fn model_ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    /// Predefined head groups for a model (empty when none are shipped)
    pub fn predefined_groups(&self, model_id: &str) -> &[PredefinedGroup] {
        self.groups.get(model_id).map_or(&[], Vec::as_slice)
    }

    /// Head classification map for a model, derived from the predefined
    /// groups: `(layer, head)` → lowercased group name with underscores.
    /// Pairs outside every group are absent (edge records default to
    /// `"unknown"`).
    pub fn head_types(&self, model_id: &str) -> HeadTypeMap {
        let mut map = HeadTypeMap::new();
        for group in self.predefined_groups(model_id) {
            let tag = group.name.to_lowercase().replace(' ', "_");
            for &(layer, head) in &group.vertices {
                map.entry((layer, head)).or_insert_with(|| tag.clone());
            }
        }
        map
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// GPT-2 small IOI circuit groups (Wang et al. 2022)
fn gpt2_groups() -> Vec<PredefinedGroup> {
    fn group(name: &str, description: &str, vertices: &[(usize, usize)]) -> PredefinedGroup {
        PredefinedGroup {
            name: name.to_string(),
            description: Some(description.to_string()),
            vertices: vertices.to_vec(),
        }
    }

    vec![
        group(
            "Name Mover",
            "Attend to names and copy them to output. Active at END token position.",
            &[(9, 9), (10, 0), (9, 6)],
        ),
        group(
            "Negative",
            "Write in opposite direction of Name Movers, decreasing prediction confidence.",
            &[(10, 7), (11, 10)],
        ),
        group(
            "S Inhibition",
            "Reduce Name Mover Heads' attention to subject tokens. Attend to S2 and modify query patterns.",
            &[(8, 10), (7, 9), (8, 6), (7, 3)],
        ),
        group(
            "Induction",
            "Recognize [A][B]...[A] patterns to detect duplicated tokens via different mechanism.",
            &[(5, 5), (5, 9), (6, 9), (5, 8)],
        ),
        group(
            "Duplicate Token",
            "Identify repeated tokens. Active at S2, attend to S1, signal token duplication.",
            &[(0, 1), (0, 10), (3, 0)],
        ),
        group(
            "Previous Token",
            "Copy subject information to the token after S1. Support Induction Heads.",
            &[(4, 11), (2, 2)],
        ),
        group(
            "Backup Name Mover",
            "Normally inactive but replace Name Movers if they're disabled. Show circuit redundancy.",
            &[
                (11, 2),
                (10, 6),
                (10, 10),
                (10, 2),
                (9, 7),
                (10, 1),
                (11, 9),
                (9, 0),
            ],
        ),
    ]
}

/// Pythia-2.8b attribute extraction groups
fn pythia_groups() -> Vec<PredefinedGroup> {
    fn group(name: &str, description: &str, vertices: &[(usize, usize)]) -> PredefinedGroup {
        PredefinedGroup {
            name: name.to_string(),
            description: Some(description.to_string()),
            vertices: vertices.to_vec(),
        }
    }

    vec![
        group(
            "Subject Heads",
            "Attend to subject tokens and extract their attributes. May activate even when irrelevant to the query.",
            &[(17, 2), (16, 12), (21, 9), (16, 20), (22, 17), (18, 14)],
        ),
        group(
            "Relation Heads",
            "Focus on relation tokens and boost possible answers for that relation type. Operate independently of subjects.",
            &[(13, 31), (18, 20), (14, 24), (21, 18)],
        ),
        group(
            "Mixed Heads",
            "Attend to both subject and relation tokens. Extract correct attributes more effectively through subject to relation propagation.",
            &[
                (17, 17),
                (21, 23),
                (23, 22),
                (26, 8),
                (22, 15),
                (17, 30),
                (18, 25),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = Catalog::builtin();
        let gpt2 = catalog.get("gpt2-small").unwrap();
        assert_eq!(gpt2.layers, 12);
        assert_eq!(gpt2.heads, 12);
        assert!(catalog.get("gpt5").is_none());
    }

    #[test]
    fn test_predefined_groups_present() {
        let catalog = Catalog::builtin();
        let groups = catalog.predefined_groups("gpt2-small");
        assert_eq!(groups.len(), 7);
        assert_eq!(groups[0].name, "Name Mover");
        assert!(catalog.predefined_groups("unknown-model").is_empty());
    }

    #[test]
    fn test_head_types_from_groups() {
        let catalog = Catalog::builtin();
        let types = catalog.head_types("gpt2-small");
        assert_eq!(types.get(&(5, 5)).unwrap(), "induction");
        assert_eq!(types.get(&(9, 9)).unwrap(), "name_mover");
        assert!(types.get(&(0, 0)).is_none());
    }
}
