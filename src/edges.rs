//! Edge builder: flatten a trimmed attention tensor into the canonical
//! attention-pattern record list.
//!
//! Every downstream consumer (renderer, sample-data files, HTTP responses)
//! depends on this list, so the builder is a pure, deterministic function:
//! identical inputs produce byte-identical ordered output on any platform.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::extractor::AttentionTensor;

/// Tag used when a head has no entry in the classification map
pub const UNKNOWN_HEAD_TYPE: &str = "unknown";

/// Optional head classification, keyed by `(layer, head)`
pub type HeadTypeMap = HashMap<(usize, usize), String>;

/// One attention edge in the layer × token grid.
///
/// `dest_layer` is always `source_layer + 1`: an edge represents the head's
/// output at layer L being consumed as input to layer L+1, not same-layer
/// self-attention. The displayed layer axis therefore has one more level
/// than the model has layers, and the top level is destination-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionPattern {
    pub source_layer: usize,
    pub source_token: usize,
    pub dest_layer: usize,
    pub dest_token: usize,
    pub weight: f32,
    pub head: usize,
    pub head_type: String,
}

/// Flatten a trimmed attention tensor into edge records.
///
/// Emits one record per `(layer, head, dest, src)` combination: dense,
/// regardless of weight; filtering is a presentation-time concern. Iteration
/// order is layer ascending, then head, then dest token, then source token.
///
/// `head_types` classifies heads by `(layer, head)`; absent entries get
/// [`UNKNOWN_HEAD_TYPE`]. The field is always populated, never omitted.
pub fn build(
    tokens: &[String],
    tensor: &AttentionTensor,
    head_types: Option<&HeadTypeMap>,
) -> Vec<AttentionPattern> {
    let (layers, heads, n_tokens, _) = tensor.dims();
    debug_assert_eq!(tokens.len(), n_tokens);

    let mut patterns = Vec::with_capacity(layers * heads * n_tokens * n_tokens);
    for layer in 0..layers {
        for head in 0..heads {
            let head_type = head_types
                .and_then(|m| m.get(&(layer, head)))
                .map_or(UNKNOWN_HEAD_TYPE, String::as_str);
            for dest in 0..n_tokens {
                for src in 0..n_tokens {
                    patterns.push(AttentionPattern {
                        source_layer: layer,
                        source_token: src,
                        dest_layer: layer + 1,
                        dest_token: dest,
                        weight: tensor.get(layer, head, dest, src),
                        head,
                        head_type: head_type.to_string(),
                    });
                }
            }
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tok{i}")).collect()
    }

    #[test]
    fn test_cardinality_and_layer_shift() {
        let tensor = AttentionTensor::from_fn(3, 2, 4, |_, _, _, _| 0.25);
        let edges = build(&tokens(4), &tensor, None);

        assert_eq!(edges.len(), 3 * 2 * 4 * 4);
        assert!(edges.iter().all(|e| e.dest_layer == e.source_layer + 1));
        assert!(edges.iter().all(|e| e.head_type == UNKNOWN_HEAD_TYPE));
    }

    #[test]
    fn test_iteration_order() {
        let tensor = AttentionTensor::from_fn(2, 2, 2, |l, h, d, s| {
            (l * 1000 + h * 100 + d * 10 + s) as f32
        });
        let edges = build(&tokens(2), &tensor, None);

        // First records cover layer 0, head 0, dest 0, src ascending
        assert_eq!(edges[0].weight, 0.0);
        assert_eq!(edges[1].weight, 1.0);
        assert_eq!(edges[1].source_token, 1);
        assert_eq!(edges[2].dest_token, 1);
        // Head increments before layer
        assert_eq!(edges[4].head, 1);
        assert_eq!(edges[4].source_layer, 0);
        assert_eq!(edges[8].source_layer, 1);
    }

    #[test]
    fn test_determinism() {
        let tensor = AttentionTensor::from_fn(2, 3, 3, |l, h, d, s| {
            ((l + 1) * (h + 2)) as f32 / ((d + s + 1) as f32 * 10.0)
        });
        let toks = tokens(3);
        assert_eq!(build(&toks, &tensor, None), build(&toks, &tensor, None));
    }

    #[test]
    fn test_head_type_lookup() {
        let tensor = AttentionTensor::from_fn(2, 2, 1, |_, _, _, _| 1.0);
        let mut types = HeadTypeMap::new();
        types.insert((1, 0), "induction".to_string());

        let edges = build(&tokens(1), &tensor, Some(&types));
        let induction: Vec<_> = edges.iter().filter(|e| e.head_type == "induction").collect();
        assert_eq!(induction.len(), 1);
        assert_eq!(induction[0].source_layer, 1);
        assert_eq!(induction[0].head, 0);
        assert!(edges
            .iter()
            .all(|e| e.head_type == "induction" || e.head_type == UNKNOWN_HEAD_TYPE));
    }

    #[test]
    fn test_wire_shape() {
        let pattern = AttentionPattern {
            source_layer: 1,
            source_token: 2,
            dest_layer: 2,
            dest_token: 3,
            weight: 0.5,
            head: 4,
            head_type: "unknown".to_string(),
        };
        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["sourceLayer"], 1);
        assert_eq!(json["destLayer"], 2);
        assert_eq!(json["headType"], "unknown");
    }
}
