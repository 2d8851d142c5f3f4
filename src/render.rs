//! Graph renderer: turn the edge list, head groups, selections and a weight
//! threshold into a drawable scene.
//!
//! Pure function of its inputs; it owns no state and does no I/O. Positions
//! are in grid units (token index on x, layer level on y); mapping to
//! pixels, curve interpolation and hit testing belong to the drawing layer.

use serde::{Deserialize, Serialize};

use crate::edges::AttentionPattern;
use crate::groups::{color_for_pair, HeadGroup, HeadPair, DEFAULT_HEAD_COLOR};

/// How the drawing layer should interpolate edge curves. Cosmetic only:
/// the scene's control points are the same for every style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveStyle {
    #[default]
    Cubic,
    Quadratic,
    Linear,
    Spline,
}

/// One node of the layer × token grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridNode {
    pub layer: usize,
    pub token: usize,
}

/// One surviving edge as a curved connector in grid coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneEdge {
    /// (token, layer) of the source grid node
    pub source: (f32, f32),
    /// Curvature control point: horizontal midpoint, half a level above the
    /// higher endpoint
    pub control: (f32, f32),
    /// (token, layer) of the destination grid node
    pub target: (f32, f32),
    pub weight: f32,
    pub head: usize,
    pub source_layer: usize,
    pub color: String,
}

/// One legend row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub label: String,
    pub color: String,
    pub description: Option<String>,
}

/// Drawable scene: grid nodes, curved edges and a legend
#[derive(Debug, Clone, Default, Serialize)]
pub struct Scene {
    pub nodes: Vec<GridNode>,
    pub edges: Vec<SceneEdge>,
    pub legend: Vec<LegendEntry>,
    pub curve_style: CurveStyle,
}

fn in_groups(layer: usize, head: usize, groups: &[HeadGroup]) -> bool {
    groups.iter().any(|g| g.contains(layer, head))
}

fn in_selections(layer: usize, head: usize, selections: &[HeadPair]) -> bool {
    selections
        .iter()
        .any(|s| s.layer == layer && s.head == head)
}

/// Build a scene from the dense edge list.
///
/// Edges survive when `weight >= threshold` AND their `(source_layer, head)`
/// appears in the union of group heads and selection pairs. Grid nodes cover
/// every (layer level, token) combination including the destination-only top
/// level. The legend lists groups first (creation order), then ungrouped
/// individual selections. A selected pair that is also grouped gets no
/// separate row; the group wins entirely.
pub fn render(
    edges: &[AttentionPattern],
    groups: &[HeadGroup],
    selections: &[HeadPair],
    threshold: f32,
) -> Scene {
    // The input list is dense, so grid dimensions fall out of it directly.
    let levels = edges.iter().map(|e| e.dest_layer + 1).max().unwrap_or(0);
    let n_tokens = edges.iter().map(|e| e.dest_token + 1).max().unwrap_or(0);

    let mut nodes = Vec::with_capacity(levels * n_tokens);
    for layer in 0..levels {
        for token in 0..n_tokens {
            nodes.push(GridNode { layer, token });
        }
    }

    let mut scene_edges = Vec::new();
    for edge in edges {
        if edge.weight < threshold {
            continue;
        }
        let grouped = in_groups(edge.source_layer, edge.head, groups);
        if !grouped && !in_selections(edge.source_layer, edge.head, selections) {
            continue;
        }

        let color = if grouped {
            color_for_pair(edge.source_layer, edge.head, groups)
        } else {
            selections
                .iter()
                .find(|s| s.layer == edge.source_layer && s.head == edge.head)
                .and_then(|s| s.color.clone())
                .unwrap_or_else(|| DEFAULT_HEAD_COLOR.to_string())
        };

        let source = (edge.source_token as f32, edge.source_layer as f32);
        let target = (edge.dest_token as f32, edge.dest_layer as f32);
        let control = (
            (source.0 + target.0) / 2.0,
            edge.source_layer.max(edge.dest_layer) as f32 + 0.5,
        );

        scene_edges.push(SceneEdge {
            source,
            control,
            target,
            weight: edge.weight,
            head: edge.head,
            source_layer: edge.source_layer,
            color,
        });
    }

    // Legend rows exist because a group/selection exists, not because any of
    // its edges survived the filter.
    let mut legend = Vec::new();
    for group in groups {
        legend.push(LegendEntry {
            label: group.name.clone(),
            color: group.resolved_color(),
            description: group.description.clone(),
        });
    }
    for selection in selections {
        if in_groups(selection.layer, selection.head, groups) {
            continue;
        }
        legend.push(LegendEntry {
            label: format!("Layer {}, Head {}", selection.layer, selection.head),
            color: selection
                .color
                .clone()
                .unwrap_or_else(|| DEFAULT_HEAD_COLOR.to_string()),
            description: None,
        });
    }

    Scene {
        nodes,
        edges: scene_edges,
        legend,
        curve_style: CurveStyle::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::build;
    use crate::extractor::AttentionTensor;

    fn dense_edges(layers: usize, heads: usize, n: usize, weight: f32) -> Vec<AttentionPattern> {
        let tokens: Vec<String> = (0..n).map(|i| format!("t{i}")).collect();
        let tensor = AttentionTensor::from_fn(layers, heads, n, |_, _, _, _| weight);
        build(&tokens, &tensor, None)
    }

    fn group(id: usize, pairs: &[(usize, usize)]) -> HeadGroup {
        HeadGroup {
            id,
            name: format!("group-{id}"),
            description: None,
            color: None,
            heads: pairs.iter().map(|&(l, h)| HeadPair::new(l, h)).collect(),
        }
    }

    #[test]
    fn test_grid_covers_destination_only_level() {
        let edges = dense_edges(2, 1, 3, 0.5);
        let scene = render(&edges, &[], &[], 0.0);
        // 3 levels (2 model layers + destination-only top) x 3 tokens
        assert_eq!(scene.nodes.len(), 9);
        assert!(scene.nodes.iter().any(|n| n.layer == 2));
        // Nothing grouped or selected, so no edges survive
        assert!(scene.edges.is_empty());
    }

    #[test]
    fn test_threshold_and_visibility_filter() {
        let edges = dense_edges(2, 2, 2, 0.5);
        let groups = vec![group(0, &[(0, 0)])];

        let scene = render(&edges, &groups, &[], 0.4);
        // Only (layer 0, head 0) is visible: 2x2 token pairs
        assert_eq!(scene.edges.len(), 4);
        assert!(scene.edges.iter().all(|e| e.source_layer == 0 && e.head == 0));

        let scene = render(&edges, &groups, &[], 0.6);
        assert!(scene.edges.is_empty());
        // Legend survives even when no edges do
        assert_eq!(scene.legend.len(), 1);
    }

    #[test]
    fn test_selection_color_used_for_ungrouped_head() {
        let edges = dense_edges(1, 1, 1, 1.0);
        let selection = HeadPair {
            layer: 0,
            head: 0,
            color: Some("#ABCDEF".to_string()),
        };
        let scene = render(&edges, &[], &[selection], 0.5);
        assert_eq!(scene.edges.len(), 1);
        assert_eq!(scene.edges[0].color, "#ABCDEF");
    }

    #[test]
    fn test_group_color_wins_over_selection() {
        let edges = dense_edges(1, 1, 1, 1.0);
        let mut g = group(0, &[(0, 0)]);
        g.color = Some("#111111".to_string());
        let selection = HeadPair {
            layer: 0,
            head: 0,
            color: Some("#222222".to_string()),
        };

        let scene = render(&edges, &[g], &[selection], 0.0);
        assert_eq!(scene.edges[0].color, "#111111");
        // Grouped selection gets no separate legend row
        assert_eq!(scene.legend.len(), 1);
        assert_eq!(scene.legend[0].label, "group-0");
    }

    #[test]
    fn test_legend_orders_groups_then_selections() {
        let edges = dense_edges(2, 2, 2, 0.5);
        let groups = vec![group(0, &[(0, 0)]), group(1, &[(0, 1)])];
        let selections = vec![HeadPair {
            layer: 1,
            head: 1,
            color: Some("#333333".to_string()),
        }];

        let scene = render(&edges, &groups, &selections, 0.0);
        assert_eq!(scene.legend.len(), 3);
        assert_eq!(scene.legend[0].label, "group-0");
        assert_eq!(scene.legend[1].label, "group-1");
        assert_eq!(scene.legend[2].label, "Layer 1, Head 1");
        assert_eq!(scene.legend[2].color, "#333333");
    }

    #[test]
    fn test_control_point_midpoint() {
        let edges = vec![AttentionPattern {
            source_layer: 2,
            source_token: 0,
            dest_layer: 3,
            dest_token: 4,
            weight: 1.0,
            head: 0,
            head_type: "unknown".to_string(),
        }];
        let groups = vec![group(0, &[(2, 0)])];
        let scene = render(&edges, &groups, &[], 0.0);
        assert_eq!(scene.edges[0].source, (0.0, 2.0));
        assert_eq!(scene.edges[0].target, (4.0, 3.0));
        assert_eq!(scene.edges[0].control, (2.0, 3.5));
    }

    #[test]
    fn test_empty_input_is_empty_scene() {
        let scene = render(&[], &[], &[], 0.0);
        assert!(scene.nodes.is_empty());
        assert!(scene.edges.is_empty());
        assert!(scene.legend.is_empty());
    }
}
