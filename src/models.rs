use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::LibError;

/// Tenant key. Every operation in the crate is scoped to exactly one plant;
/// there is no ambient default tenant. Deserialization goes through the same
/// non-empty check as `FromStr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct PlantId(pub String);

impl PlantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlantId {
    type Err = LibError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(LibError::invalid(
                "Plant id is required",
                anyhow!("empty plant id"),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for PlantId {
    type Error = LibError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// One materialized hierarchy level. `label` is the per-tenant primary key;
/// `path` is derived and recomputed whenever parentage changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub label: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_label: Option<String>,
    pub display_name: String,
    pub display_order: i32,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_ref: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl HierarchyNode {
    pub fn new(
        label: String,
        parent_label: Option<String>,
        path: String,
        display_order: i32,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            display_name: label.clone(),
            label,
            path,
            parent_label,
            display_order,
            is_active: true,
            icon_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// How a rebuild or repair resolves nodes whose `parent_label` points at a
/// label that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Reattach orphans at the root (`parent_label = None`).
    #[default]
    RepairToRoot,
    /// Fail the operation and leave prior state untouched.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HierarchyViolation {
    OrphanedNode {
        label: String,
        missing_parent: String,
    },
    CycleDetected {
        labels: Vec<String>,
    },
    DuplicateLabel {
        label: String,
    },
}

impl HierarchyViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            HierarchyViolation::OrphanedNode { .. } => "hierarchy_orphaned_node",
            HierarchyViolation::CycleDetected { .. } => "hierarchy_cycle",
            HierarchyViolation::DuplicateLabel { .. } => "hierarchy_duplicate_label",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            HierarchyViolation::OrphanedNode { .. } => {
                "Node references a parent label that does not exist"
            }
            HierarchyViolation::CycleDetected { .. } => "Hierarchy parent links form a cycle",
            HierarchyViolation::DuplicateLabel { .. } => {
                "Hierarchy contains duplicate labels"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub total_records: usize,
    pub orphaned_count: usize,
    pub cycle_count: usize,
    pub violations: Vec<HierarchyViolation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    pub repaired_orphans: usize,
    pub report: ValidationReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResult {
    pub created: usize,
    pub deleted: usize,
    pub total_paths: usize,
    pub valid_paths: usize,
    pub invalid_paths: usize,
    pub conflicting_parents: usize,
    /// Nodes excluded because their parent chain loops back on itself.
    pub cyclic_nodes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildPayload {
    pub paths: Vec<String>,
}

/// Partial update with one named slot per mutable attribute. Unknown fields
/// are rejected outright rather than silently dropped.
///
/// `parent_label` and `icon_ref` distinguish "absent" from "set to null":
/// `Some(None)` clears the value, `None` leaves it alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateNodePayload {
    pub display_name: Option<String>,
    pub display_order: Option<i32>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_label: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub icon_ref: Option<Option<String>>,
}

fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl UpdateNodePayload {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.display_order.is_none()
            && self.is_active.is_none()
            && self.parent_label.is_none()
            && self.icon_ref.is_none()
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.display_name.is_some() {
            fields.push("display_name");
        }
        if self.display_order.is_some() {
            fields.push("display_order");
        }
        if self.is_active.is_some() {
            fields.push("is_active");
        }
        if self.parent_label.is_some() {
            fields.push("parent_label");
        }
        if self.icon_ref.is_some() {
            fields.push("icon_ref");
        }
        fields
    }
}

/// Nested presentation view, recomputed on demand and never cached here.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub node: HierarchyNode,
    pub children: Vec<TreeNode>,
}

/// The committed mapping for one tenant: an arena of nodes addressed by
/// label plus a parent-to-children adjacency index.
///
/// Orphaned nodes stay in `nodes` but appear neither in `roots` nor under
/// any parent until repaired; the validator reports them.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    pub nodes: HashMap<String, HierarchyNode>,
    /// parent label -> child labels, ordered by `display_order`.
    pub children: HashMap<String, Vec<String>>,
    /// Root labels, ordered by `display_order`.
    pub roots: Vec<String>,
}

impl TreeSnapshot {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&HierarchyNode> {
        self.nodes.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.nodes.contains_key(label)
    }

    pub fn children_of(&self, parent_label: &str) -> &[String] {
        self.children
            .get(parent_label)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All nodes ordered by `display_order` (label as tiebreaker).
    pub fn ordered_nodes(&self) -> Vec<&HierarchyNode> {
        let mut nodes: Vec<&HierarchyNode> = self.nodes.values().collect();
        nodes.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.label.cmp(&b.label))
        });
        nodes
    }

    /// Labels of every node below `label`, breadth-first. Does not include
    /// `label` itself.
    pub fn descendants(&self, label: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(label);

        while let Some(current) = queue.pop_front() {
            for child in self.children_of(current) {
                found.push(child.clone());
                queue.push_back(child);
            }
        }

        found
    }

    /// Rebuild `children` and `roots` from the node map. Children whose
    /// parent label is missing from the map are left out of the index.
    pub fn reindex(&mut self) {
        self.children.clear();
        self.roots.clear();

        let mut ordered: Vec<&HierarchyNode> = self.nodes.values().collect();
        ordered.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then_with(|| a.label.cmp(&b.label))
        });

        for node in ordered {
            match &node.parent_label {
                None => self.roots.push(node.label.clone()),
                Some(parent) => {
                    if self.nodes.contains_key(parent) {
                        self.children
                            .entry(parent.clone())
                            .or_default()
                            .push(node.label.clone());
                    }
                }
            }
        }
    }
}
