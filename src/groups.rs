//! Head groups and individual head selections.
//!
//! A [`HeadRegistry`] is the session-scoped aggregate the dashboard mutates:
//! named groups of (layer, head) pairs plus a separate ordered list of
//! individually selected pairs. A pair may belong to several groups at once;
//! for coloring, the first containing group (in list order) wins.
//!
//! Duplicate selection entries are preserved: re-adding the same
//! pair yields two entries, and `remove_selection` drops all of them.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::PredefinedGroup;

/// Shared color palette for groups and selections
pub const COLOR_PALETTE: [&str; 28] = [
    "#4ECDC4", // Turquoise
    "#FFD166", // Warm yellow
    "#7EDC11", // Bright lime
    "#FF1493", // Deep pink
    "#1A9CE0", // Azure Blue
    "#FF8C42", // Bright orange
    "#06D6A0", // Bright turquoise
    "#FFBB33", // Amber
    "#4B0082", // Indigo
    "#A7E541", // Lime green
    "#FF5C5C", // Coral Red
    "#66D7EE", // Sky Blue
    "#FFE066", // Yellow Gold
    "#233FD2", // Royal Blue
    "#74E39A", // Mint Green
    "#FF3377", // Hot Pink
    "#5BC0EB", // Light blue
    "#FFA07A", // Light salmon orange
    "#118AB2", // Blue
    "#C1FF72", // Lime Green
    "#D90368", // Magenta
    "#00AA5B", // Emerald Green
    "#FF6B35", // Deep orange
    "#F8E16C", // Light yellow
    "#9F0162", // Deep Magenta
    "#1EAE98", // Teal green
    "#FF3366", // Coral pink
    "#731DD8", // Electric Purple
];

/// Color for heads that are in no group
pub const DEFAULT_HEAD_COLOR: &str = "#3B82F6";

/// Draw a random color from the palette
pub fn random_palette_color() -> String {
    let mut rng = rand::thread_rng();
    COLOR_PALETTE[rng.gen_range(0..COLOR_PALETTE.len())].to_string()
}

/// Head-group layer failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    /// Selection spec is not `layer,head` with optional `:` wildcards
    #[error("invalid selection '{0}': expected 'layer,head' with ':' wildcards")]
    Parse(String),
    /// Layer or head index exceeds the loaded model's dimensions
    #[error("{what} {value} out of range (must be below {max})")]
    OutOfRange {
        what: &'static str,
        value: usize,
        max: usize,
    },
    /// Group name is empty or whitespace-only
    #[error("group name cannot be empty")]
    InvalidName,
    /// No group with this id
    #[error("no group with id {0}")]
    NotFound(usize),
}

/// One (layer, head) pair, optionally with an explicit display color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadPair {
    pub layer: usize,
    pub head: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl HeadPair {
    pub fn new(layer: usize, head: usize) -> Self {
        Self {
            layer,
            head,
            color: None,
        }
    }
}

/// A named group of head pairs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadGroup {
    /// Stable sequence number, assigned at creation, never reused
    pub id: usize,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub heads: Vec<HeadPair>,
}

impl HeadGroup {
    /// Whether this group contains the pair
    pub fn contains(&self, layer: usize, head: usize) -> bool {
        self.heads.iter().any(|h| h.layer == layer && h.head == head)
    }

    /// Explicit color if set, otherwise the palette color for this id
    pub fn resolved_color(&self) -> String {
        self.color
            .clone()
            .unwrap_or_else(|| COLOR_PALETTE[self.id % COLOR_PALETTE.len()].to_string())
    }
}

/// Resolve the display color for a pair: first containing group (in list
/// order) wins; pairs in no group get [`DEFAULT_HEAD_COLOR`]. Always
/// returns a color.
pub fn color_for_pair(layer: usize, head: usize, groups: &[HeadGroup]) -> String {
    groups
        .iter()
        .find(|g| g.contains(layer, head))
        .map_or_else(|| DEFAULT_HEAD_COLOR.to_string(), HeadGroup::resolved_color)
}

/// One side of a selection spec: an index or the `:` wildcard
enum SpecPart {
    All,
    Index(usize),
}

fn parse_part(part: &str, spec: &str) -> Result<SpecPart, GroupError> {
    let part = part.trim();
    if part == ":" {
        return Ok(SpecPart::All);
    }
    part.parse::<usize>()
        .map(SpecPart::Index)
        .map_err(|_| GroupError::Parse(spec.to_string()))
}

/// Session-scoped aggregate of head groups and individual selections
#[derive(Debug, Clone, Default)]
pub struct HeadRegistry {
    groups: Vec<HeadGroup>,
    selections: Vec<HeadPair>,
    next_group_id: usize,
}

impl HeadRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with a model's predefined groups
    pub fn from_predefined(predefined: &[PredefinedGroup]) -> Self {
        let groups: Vec<HeadGroup> = predefined
            .iter()
            .enumerate()
            .map(|(id, g)| HeadGroup {
                id,
                name: g.name.clone(),
                description: g.description.clone(),
                color: None,
                heads: g
                    .vertices
                    .iter()
                    .map(|&(layer, head)| HeadPair::new(layer, head))
                    .collect(),
            })
            .collect();
        let next_group_id = groups.len();
        Self {
            groups,
            selections: Vec::new(),
            next_group_id,
        }
    }

    /// Groups in creation order
    pub fn groups(&self) -> &[HeadGroup] {
        &self.groups
    }

    /// Selection entries in insertion order (duplicates preserved)
    pub fn selections(&self) -> &[HeadPair] {
        &self.selections
    }

    /// Create a new empty group.
    ///
    /// Ids are monotonic within a session and never reused after deletion.
    pub fn create_group(
        &mut self,
        name: &str,
        description: Option<&str>,
    ) -> Result<&HeadGroup, GroupError> {
        if name.trim().is_empty() {
            return Err(GroupError::InvalidName);
        }
        let id = self.next_group_id;
        self.next_group_id += 1;
        self.groups.push(HeadGroup {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            color: None,
            heads: Vec::new(),
        });
        Ok(self.groups.last().expect("group was just pushed"))
    }

    /// Delete a group; no-op if the id does not exist
    pub fn delete_group(&mut self, id: usize) {
        self.groups.retain(|g| g.id != id);
    }

    /// Set a group's color, or draw a fresh random palette color when `None`
    pub fn recolor_group(&mut self, id: usize, color: Option<String>) -> Result<(), GroupError> {
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(GroupError::NotFound(id))?;
        group.color = Some(color.unwrap_or_else(random_palette_color));
        Ok(())
    }

    /// Add individual selections from a spec string.
    ///
    /// Four forms: `"L,H"` (single pair), `"L,:"` (all heads at layer L),
    /// `":,H"` (head H at every layer), `":,:"` (full cross product). Bounds
    /// are checked against `n_layers`/`n_heads` before anything is appended,
    /// so a failed call leaves the selection list untouched. Each appended
    /// pair gets a freshly drawn palette color; duplicates are not merged.
    ///
    /// Returns the number of pairs appended.
    pub fn add_selection(
        &mut self,
        spec: &str,
        n_layers: usize,
        n_heads: usize,
    ) -> Result<usize, GroupError> {
        let parts: Vec<&str> = spec.split(',').collect();
        if parts.len() != 2 {
            return Err(GroupError::Parse(spec.to_string()));
        }
        let layer_part = parse_part(parts[0], spec)?;
        let head_part = parse_part(parts[1], spec)?;

        if let SpecPart::Index(layer) = layer_part {
            if layer >= n_layers {
                return Err(GroupError::OutOfRange {
                    what: "layer",
                    value: layer,
                    max: n_layers,
                });
            }
        }
        if let SpecPart::Index(head) = head_part {
            if head >= n_heads {
                return Err(GroupError::OutOfRange {
                    what: "head",
                    value: head,
                    max: n_heads,
                });
            }
        }

        let layers: Vec<usize> = match layer_part {
            SpecPart::All => (0..n_layers).collect(),
            SpecPart::Index(l) => vec![l],
        };
        let heads: Vec<usize> = match head_part {
            SpecPart::All => (0..n_heads).collect(),
            SpecPart::Index(h) => vec![h],
        };

        let mut added = 0;
        for &layer in &layers {
            for &head in &heads {
                self.selections.push(HeadPair {
                    layer,
                    head,
                    color: Some(random_palette_color()),
                });
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove all selection entries matching the pair; no-op if none match
    pub fn remove_selection(&mut self, layer: usize, head: usize) {
        self.selections
            .retain(|h| !(h.layer == layer && h.head == head));
    }

    /// Resolve the color for a pair against this registry's groups
    pub fn color_for_pair(&self, layer: usize, head: usize) -> String {
        color_for_pair(layer, head, &self.groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_group_assigns_monotonic_ids() {
        let mut registry = HeadRegistry::new();
        let a = registry.create_group("Induction", None).unwrap().id;
        let b = registry.create_group("Copy", Some("copy heads")).unwrap().id;
        assert_eq!((a, b), (0, 1));

        registry.delete_group(1);
        let c = registry.create_group("Previous", None).unwrap().id;
        // Deleted ids are never reused
        assert_eq!(c, 2);
    }

    #[test]
    fn test_create_group_rejects_blank_name() {
        let mut registry = HeadRegistry::new();
        assert_eq!(registry.create_group("", None), Err(GroupError::InvalidName));
        assert_eq!(
            registry.create_group("   ", None),
            Err(GroupError::InvalidName)
        );
        assert!(registry.groups().is_empty());
    }

    #[test]
    fn test_delete_group_is_idempotent() {
        let mut registry = HeadRegistry::new();
        registry.create_group("A", None).unwrap();
        registry.delete_group(42);
        registry.delete_group(42);
        assert_eq!(registry.groups().len(), 1);
    }

    #[test]
    fn test_recolor_missing_group() {
        let mut registry = HeadRegistry::new();
        assert_eq!(
            registry.recolor_group(7, None),
            Err(GroupError::NotFound(7))
        );
    }

    #[test]
    fn test_recolor_draws_palette_color() {
        let mut registry = HeadRegistry::new();
        registry.create_group("A", None).unwrap();
        registry.recolor_group(0, None).unwrap();
        let color = registry.groups()[0].color.clone().unwrap();
        assert!(COLOR_PALETTE.contains(&color.as_str()));

        registry
            .recolor_group(0, Some("#123456".to_string()))
            .unwrap();
        assert_eq!(registry.groups()[0].color.as_deref(), Some("#123456"));
    }

    #[test]
    fn test_selection_forms() {
        let mut registry = HeadRegistry::new();
        assert_eq!(registry.add_selection("1,2", 12, 12).unwrap(), 1);
        assert_eq!(registry.selections().len(), 1);
        assert_eq!(registry.selections()[0].layer, 1);
        assert_eq!(registry.selections()[0].head, 2);

        assert_eq!(registry.add_selection("1,:", 12, 12).unwrap(), 12);
        assert_eq!(registry.add_selection(":,3", 12, 12).unwrap(), 12);
        assert_eq!(registry.add_selection(":,:", 12, 12).unwrap(), 144);
        assert_eq!(registry.selections().len(), 1 + 12 + 12 + 144);
    }

    #[test]
    fn test_selection_out_of_range_leaves_state_untouched() {
        let mut registry = HeadRegistry::new();
        registry.add_selection("0,0", 12, 12).unwrap();

        let err = registry.add_selection("99,0", 12, 12).unwrap_err();
        assert_eq!(
            err,
            GroupError::OutOfRange {
                what: "layer",
                value: 99,
                max: 12
            }
        );
        assert_eq!(registry.selections().len(), 1);

        let err = registry.add_selection(":,99", 12, 12).unwrap_err();
        assert!(matches!(err, GroupError::OutOfRange { what: "head", .. }));
        assert_eq!(registry.selections().len(), 1);
    }

    #[test]
    fn test_selection_parse_errors() {
        let mut registry = HeadRegistry::new();
        for bad in ["", "1", "1,2,3", "a,b", "1;2", "-1,0"] {
            assert!(matches!(
                registry.add_selection(bad, 12, 12),
                Err(GroupError::Parse(_))
            ));
        }
        assert!(registry.selections().is_empty());
    }

    #[test]
    fn test_duplicates_preserved_and_removed_together() {
        let mut registry = HeadRegistry::new();
        registry.add_selection("3,4", 12, 12).unwrap();
        registry.add_selection("3,4", 12, 12).unwrap();
        assert_eq!(registry.selections().len(), 2);

        registry.remove_selection(3, 4);
        assert!(registry.selections().is_empty());
        // Removing again is a no-op
        registry.remove_selection(3, 4);
    }

    #[test]
    fn test_color_for_pair_is_total() {
        let groups = vec![
            HeadGroup {
                id: 0,
                name: "First".to_string(),
                description: None,
                color: Some("#111111".to_string()),
                heads: vec![HeadPair::new(1, 1)],
            },
            HeadGroup {
                id: 1,
                name: "Second".to_string(),
                description: None,
                color: None,
                heads: vec![HeadPair::new(1, 1), HeadPair::new(2, 2)],
            },
        ];

        // First containing group wins
        assert_eq!(color_for_pair(1, 1, &groups), "#111111");
        // Palette fallback by id
        assert_eq!(color_for_pair(2, 2, &groups), COLOR_PALETTE[1]);
        // Ungrouped pairs get the default, never an error
        assert_eq!(color_for_pair(9, 9, &groups), DEFAULT_HEAD_COLOR);
        assert_eq!(color_for_pair(0, 0, &[]), DEFAULT_HEAD_COLOR);
    }

    #[test]
    fn test_from_predefined_seeds_groups() {
        let predefined = vec![PredefinedGroup {
            name: "Induction".to_string(),
            description: Some("induction heads".to_string()),
            vertices: vec![(5, 5), (5, 9)],
        }];
        let registry = HeadRegistry::from_predefined(&predefined);
        assert_eq!(registry.groups().len(), 1);
        assert!(registry.groups()[0].contains(5, 9));
        assert!(!registry.groups()[0].contains(5, 6));

        let mut registry = registry;
        let next = registry.create_group("User", None).unwrap().id;
        assert_eq!(next, 1);
    }
}
