use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use chrono::Utc;

use crate::builder::{build_tree, recompute_paths};
use crate::error::{LibError, Result};
use crate::invariants;
use crate::models::{
    HierarchyNode, OrphanPolicy, PlantId, RebuildResult, RepairOutcome, TreeNode, TreeSnapshot,
    UpdateNodePayload, ValidationReport,
};
use crate::parser::parse_paths;
use crate::tree::tree_view;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub orphan_policy: OrphanPolicy,
}

/// Tenant-keyed hierarchy state. The engine is caller-owned and passed into
/// every operation site; there is no global registry.
///
/// Writes are single-writer per tenant: each plant's snapshot sits behind its
/// own lock, and every mutation (bulk rebuild included) swaps or edits the
/// snapshot under that lock, so readers observe either the pre- or the
/// post-state, never an interleaving.
#[derive(Default)]
pub struct HierarchyEngine {
    config: EngineConfig,
    trees: RwLock<HashMap<PlantId, Arc<RwLock<TreeSnapshot>>>>,
}

impl HierarchyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            trees: RwLock::new(HashMap::new()),
        }
    }

    pub fn orphan_policy(&self) -> OrphanPolicy {
        self.config.orphan_policy
    }

    fn tenant(&self, plant: &PlantId) -> Option<Arc<RwLock<TreeSnapshot>>> {
        self.trees
            .read()
            .expect("tenant registry lock poisoned")
            .get(plant)
            .cloned()
    }

    fn tenant_or_create(&self, plant: &PlantId) -> Arc<RwLock<TreeSnapshot>> {
        let mut registry = self.trees.write().expect("tenant registry lock poisoned");
        Arc::clone(registry.entry(plant.clone()).or_default())
    }

    /// Destructively replace the plant's entire tree from raw path strings.
    ///
    /// Parse, build, and policy application all happen off to the side; the
    /// previous snapshot is only swapped out once the replacement is fully
    /// formed, so a rejected batch leaves prior state untouched.
    pub fn rebuild(&self, plant: &PlantId, raw_paths: &[String]) -> Result<RebuildResult> {
        let now = Utc::now().naive_utc();
        let parsed = parse_paths(raw_paths.iter().map(String::as_str));
        let outcome = build_tree(parsed.records, now);

        let mut snapshot = outcome.snapshot;
        invariants::repair(&mut snapshot, self.config.orphan_policy, now)?;

        let created = snapshot.len();
        let tree = self.tenant_or_create(plant);
        let mut guard = tree.write().expect("hierarchy tree lock poisoned");
        let deleted = guard.len();
        *guard = snapshot;

        tracing::info!(
            plant = %plant,
            created,
            deleted,
            invalid = parsed.invalid_paths.len(),
            conflicts = outcome.conflicting_parents,
            cyclic = outcome.cyclic_labels.len(),
            "rebuilt hierarchy"
        );

        Ok(RebuildResult {
            created,
            deleted,
            total_paths: parsed.total_paths,
            valid_paths: parsed.valid_paths,
            invalid_paths: parsed.invalid_paths.len(),
            conflicting_parents: outcome.conflicting_parents,
            cyclic_nodes: outcome.cyclic_labels.len(),
        })
    }

    /// All nodes for the plant, ordered by `display_order`.
    pub fn get_all(&self, plant: &PlantId) -> Result<Vec<HierarchyNode>> {
        let Some(tree) = self.tenant(plant) else {
            return Ok(Vec::new());
        };
        let guard = tree.read().expect("hierarchy tree lock poisoned");
        Ok(guard.ordered_nodes().into_iter().cloned().collect())
    }

    pub fn get_tree(&self, plant: &PlantId) -> Result<Vec<TreeNode>> {
        let Some(tree) = self.tenant(plant) else {
            return Ok(Vec::new());
        };
        let guard = tree.read().expect("hierarchy tree lock poisoned");
        Ok(tree_view(&guard))
    }

    pub fn get_by_label(&self, plant: &PlantId, label: &str) -> Result<HierarchyNode> {
        let tree = self.tenant(plant).ok_or_else(|| node_not_found(plant, label))?;
        let guard = tree.read().expect("hierarchy tree lock poisoned");
        guard
            .get(label)
            .cloned()
            .ok_or_else(|| node_not_found(plant, label))
    }

    pub fn get_children(&self, plant: &PlantId, parent_label: &str) -> Result<Vec<HierarchyNode>> {
        let tree = self
            .tenant(plant)
            .ok_or_else(|| node_not_found(plant, parent_label))?;
        let guard = tree.read().expect("hierarchy tree lock poisoned");
        if !guard.contains(parent_label) {
            return Err(node_not_found(plant, parent_label));
        }

        Ok(guard
            .children_of(parent_label)
            .iter()
            .filter_map(|child| guard.get(child).cloned())
            .collect())
    }

    /// Apply a partial update to one node. Returns the names of the fields
    /// that were applied.
    ///
    /// Reparenting re-runs the orphan and cycle checks for the affected
    /// subtree before committing and recomputes descendant paths after.
    pub fn update(
        &self,
        plant: &PlantId,
        label: &str,
        payload: UpdateNodePayload,
    ) -> Result<Vec<&'static str>> {
        if payload.is_empty() {
            return Err(LibError::invalid(
                "No valid fields to update",
                anyhow!("empty update payload for label {}", label),
            ));
        }

        let tree = self.tenant(plant).ok_or_else(|| node_not_found(plant, label))?;
        let mut guard = tree.write().expect("hierarchy tree lock poisoned");
        if !guard.contains(label) {
            return Err(node_not_found(plant, label));
        }

        if let Some(Some(new_parent)) = &payload.parent_label {
            if new_parent == label {
                return Err(LibError::invalid_with_code(
                    "hierarchy_cycle",
                    "Node cannot be its own parent",
                    anyhow!("self-parent for label {}", label),
                ));
            }
            if !guard.contains(new_parent) {
                return Err(LibError::invalid_with_code(
                    "hierarchy_orphaned_node",
                    "New parent label does not exist",
                    anyhow!("parent {} not found for label {}", new_parent, label),
                ));
            }
            if guard.descendants(label).contains(new_parent) {
                return Err(LibError::invalid_with_code(
                    "hierarchy_cycle",
                    "Node cannot be reparented under its own descendant",
                    anyhow!("reparenting {} under descendant {}", label, new_parent),
                ));
            }
        }

        let now = Utc::now().naive_utc();
        let fields = payload.field_names();
        let structural = payload.parent_label.is_some() || payload.display_order.is_some();

        {
            let node = guard
                .nodes
                .get_mut(label)
                .expect("node checked present above");
            if let Some(display_name) = payload.display_name {
                node.display_name = display_name;
            }
            if let Some(display_order) = payload.display_order {
                node.display_order = display_order;
            }
            if let Some(is_active) = payload.is_active {
                node.is_active = is_active;
            }
            if let Some(parent_label) = payload.parent_label {
                node.parent_label = parent_label;
            }
            if let Some(icon_ref) = payload.icon_ref {
                node.icon_ref = icon_ref;
            }
            node.updated_at = now;
        }

        if structural {
            recompute_paths(&mut guard.nodes);
            guard.reindex();
        }

        Ok(fields)
    }

    /// Delete a node and every descendant. Returns the number of nodes
    /// removed.
    pub fn delete(&self, plant: &PlantId, label: &str) -> Result<usize> {
        let tree = self.tenant(plant).ok_or_else(|| node_not_found(plant, label))?;
        let mut guard = tree.write().expect("hierarchy tree lock poisoned");
        if !guard.contains(label) {
            return Err(node_not_found(plant, label));
        }

        let mut doomed = guard.descendants(label);
        doomed.push(label.to_string());
        for target in &doomed {
            guard.nodes.remove(target);
        }
        guard.reindex();

        Ok(doomed.len())
    }

    pub fn clear(&self, plant: &PlantId) -> Result<usize> {
        let Some(tree) = self.tenant(plant) else {
            return Ok(0);
        };
        let mut guard = tree.write().expect("hierarchy tree lock poisoned");
        let deleted = guard.len();
        *guard = TreeSnapshot::default();

        tracing::info!(plant = %plant, deleted, "cleared hierarchy");
        Ok(deleted)
    }

    pub fn validate(&self, plant: &PlantId) -> Result<ValidationReport> {
        let Some(tree) = self.tenant(plant) else {
            return Ok(invariants::validation_report(&TreeSnapshot::default()));
        };
        let guard = tree.read().expect("hierarchy tree lock poisoned");
        Ok(invariants::validation_report(&guard))
    }

    /// Explicitly apply the configured orphan policy and re-validate.
    pub fn repair(&self, plant: &PlantId) -> Result<RepairOutcome> {
        let now = Utc::now().naive_utc();
        let Some(tree) = self.tenant(plant) else {
            return Ok(RepairOutcome {
                repaired_orphans: 0,
                report: invariants::validation_report(&TreeSnapshot::default()),
            });
        };
        let mut guard = tree.write().expect("hierarchy tree lock poisoned");
        invariants::repair(&mut guard, self.config.orphan_policy, now)
    }
}

fn node_not_found(plant: &PlantId, label: &str) -> LibError {
    LibError::not_found(
        "Hierarchy node not found",
        anyhow!("label {} not found for plant {}", label, plant),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn plant(id: &str) -> PlantId {
        id.parse().expect("plant id should parse")
    }

    fn paths(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|path| path.to_string()).collect()
    }

    fn seeded() -> (HierarchyEngine, PlantId) {
        let engine = HierarchyEngine::new();
        let alpha = plant("alpha");
        engine
            .rebuild(
                &alpha,
                &paths(&[
                    "Equipment:Process:Vessel:Mixer",
                    "Equipment:Process:Vessel:Tank",
                    "Equipment:Safety:Valve",
                ]),
            )
            .expect("rebuild should succeed");
        (engine, alpha)
    }

    #[test]
    fn rebuild_reports_batch_accounting() {
        let engine = HierarchyEngine::new();
        let alpha = plant("alpha");
        let result = engine
            .rebuild(&alpha, &paths(&["A:B", "X:B", "", "A: :C"]))
            .expect("rebuild should succeed");

        assert_eq!(result.created, 3); // A, B, X
        assert_eq!(result.deleted, 0);
        assert_eq!(result.total_paths, 4);
        assert_eq!(result.valid_paths, 2);
        assert_eq!(result.invalid_paths, 2);
        assert_eq!(result.conflicting_parents, 1);
        assert_eq!(result.cyclic_nodes, 0);
    }

    #[test]
    fn rebuild_counts_nodes_excluded_for_cyclic_parentage() {
        let engine = HierarchyEngine::new();
        let alpha = plant("alpha");
        // X:Y:X reparents X under Y, so X and Y loop and Z's chain never
        // reaches a root either.
        let result = engine
            .rebuild(&alpha, &paths(&["X:Y:X:Z"]))
            .expect("rebuild should succeed");

        assert_eq!(result.created, 0);
        assert_eq!(result.cyclic_nodes, 3);
        assert_eq!(result.conflicting_parents, 1);
        assert!(engine.get_all(&alpha).expect("get_all").is_empty());
    }

    #[test]
    fn rebuild_replaces_the_previous_tree() {
        let (engine, alpha) = seeded();
        let result = engine
            .rebuild(&alpha, &paths(&["North:South"]))
            .expect("second rebuild should succeed");

        assert_eq!(result.deleted, 7);
        assert_eq!(result.created, 2);
        let labels: Vec<String> = engine
            .get_all(&alpha)
            .expect("get_all should succeed")
            .into_iter()
            .map(|node| node.label)
            .collect();
        assert_eq!(labels, ["North", "South"]);
    }

    #[test]
    fn get_all_returns_first_seen_order() {
        let (engine, alpha) = seeded();
        let labels: Vec<String> = engine
            .get_all(&alpha)
            .expect("get_all should succeed")
            .into_iter()
            .map(|node| node.label)
            .collect();
        assert_eq!(
            labels,
            ["Equipment", "Process", "Vessel", "Mixer", "Tank", "Safety", "Valve"]
        );
    }

    #[test]
    fn tenants_are_isolated() {
        let (engine, alpha) = seeded();
        let beta = plant("beta");
        engine
            .rebuild(&beta, &paths(&["Utilities:Steam"]))
            .expect("rebuild should succeed");

        assert_eq!(engine.get_all(&alpha).expect("alpha read").len(), 7);
        assert_eq!(engine.get_all(&beta).expect("beta read").len(), 2);
        assert!(engine.get_by_label(&beta, "Equipment").is_err());
    }

    #[test]
    fn get_by_label_misses_surface_not_found() {
        let (engine, alpha) = seeded();
        let err = engine
            .get_by_label(&alpha, "Reactor")
            .expect_err("unknown label should miss");
        assert_eq!(err.kind, ErrorKind::NotFound);

        let node = engine
            .get_by_label(&alpha, "Vessel")
            .expect("known label should hit");
        assert_eq!(node.path, "Equipment:Process:Vessel");
    }

    #[test]
    fn get_children_requires_a_known_parent() {
        let (engine, alpha) = seeded();
        let children: Vec<String> = engine
            .get_children(&alpha, "Vessel")
            .expect("children should resolve")
            .into_iter()
            .map(|node| node.label)
            .collect();
        assert_eq!(children, ["Mixer", "Tank"]);

        let err = engine
            .get_children(&alpha, "Reactor")
            .expect_err("unknown parent should miss");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn update_applies_named_fields_only() {
        let (engine, alpha) = seeded();
        let payload = UpdateNodePayload {
            display_name: Some("Mixing Vessel".to_string()),
            is_active: Some(false),
            icon_ref: Some(Some("icons/mixer.svg".to_string())),
            ..UpdateNodePayload::default()
        };
        let fields = engine
            .update(&alpha, "Mixer", payload)
            .expect("update should succeed");
        assert_eq!(fields, ["display_name", "is_active", "icon_ref"]);

        let mixer = engine
            .get_by_label(&alpha, "Mixer")
            .expect("Mixer should exist");
        assert_eq!(mixer.display_name, "Mixing Vessel");
        assert!(!mixer.is_active);
        assert_eq!(mixer.icon_ref.as_deref(), Some("icons/mixer.svg"));
        // Untouched fields keep their values.
        assert_eq!(mixer.display_order, 3);
    }

    #[test]
    fn empty_update_is_rejected() {
        let (engine, alpha) = seeded();
        let err = engine
            .update(&alpha, "Mixer", UpdateNodePayload::default())
            .expect_err("empty payload should fail");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }

    #[test]
    fn reparent_recomputes_descendant_paths() {
        let (engine, alpha) = seeded();
        let payload = UpdateNodePayload {
            parent_label: Some(Some("Safety".to_string())),
            ..UpdateNodePayload::default()
        };
        engine
            .update(&alpha, "Vessel", payload)
            .expect("reparent should succeed");

        let mixer = engine
            .get_by_label(&alpha, "Mixer")
            .expect("Mixer should exist");
        assert_eq!(mixer.path, "Equipment:Safety:Vessel:Mixer");
        let children: Vec<String> = engine
            .get_children(&alpha, "Process")
            .expect("children should resolve")
            .into_iter()
            .map(|node| node.label)
            .collect();
        assert!(children.is_empty());
    }

    #[test]
    fn reparent_to_root_clears_the_parent() {
        let (engine, alpha) = seeded();
        let payload = UpdateNodePayload {
            parent_label: Some(None),
            ..UpdateNodePayload::default()
        };
        engine
            .update(&alpha, "Safety", payload)
            .expect("reparent should succeed");

        let safety = engine
            .get_by_label(&alpha, "Safety")
            .expect("Safety should exist");
        assert_eq!(safety.parent_label, None);
        assert_eq!(safety.path, "Safety");
    }

    #[test]
    fn reparent_under_a_descendant_is_rejected() {
        let (engine, alpha) = seeded();
        let payload = UpdateNodePayload {
            parent_label: Some(Some("Mixer".to_string())),
            ..UpdateNodePayload::default()
        };
        let err = engine
            .update(&alpha, "Process", payload)
            .expect_err("descendant reparent should fail");
        assert_eq!(err.code, "hierarchy_cycle");

        // The tree is unchanged and still valid.
        let report = engine.validate(&alpha).expect("validate should succeed");
        assert!(report.is_valid);
    }

    #[test]
    fn reparent_to_a_missing_label_is_rejected() {
        let (engine, alpha) = seeded();
        let payload = UpdateNodePayload {
            parent_label: Some(Some("Ghost".to_string())),
            ..UpdateNodePayload::default()
        };
        let err = engine
            .update(&alpha, "Valve", payload)
            .expect_err("missing parent should fail");
        assert_eq!(err.code, "hierarchy_orphaned_node");
    }

    #[test]
    fn delete_cascades_to_descendants() {
        let (engine, alpha) = seeded();
        let deleted = engine
            .delete(&alpha, "Process")
            .expect("delete should succeed");
        assert_eq!(deleted, 4); // Process, Vessel, Mixer, Tank

        for label in ["Process", "Vessel", "Mixer", "Tank"] {
            assert!(engine.get_by_label(&alpha, label).is_err(), "{label} should be gone");
        }

        let children: Vec<String> = engine
            .get_children(&alpha, "Equipment")
            .expect("children should resolve")
            .into_iter()
            .map(|node| node.label)
            .collect();
        assert_eq!(children, ["Safety"]);
    }

    #[test]
    fn clear_empties_the_tenant_and_counts() {
        let (engine, alpha) = seeded();
        assert_eq!(engine.clear(&alpha).expect("clear should succeed"), 7);
        assert!(engine.get_all(&alpha).expect("get_all").is_empty());
        assert_eq!(engine.clear(&alpha).expect("second clear"), 0);
        assert_eq!(engine.clear(&plant("unknown")).expect("unknown clear"), 0);
    }

    #[test]
    fn validate_reports_a_healthy_tree() {
        let (engine, alpha) = seeded();
        let report = engine.validate(&alpha).expect("validate should succeed");
        assert!(report.is_valid);
        assert_eq!(report.total_records, 7);

        let empty = engine
            .validate(&plant("unknown"))
            .expect("unknown tenant validates as empty");
        assert!(empty.is_valid);
        assert_eq!(empty.total_records, 0);
    }

    #[test]
    fn get_tree_nests_and_round_trips() {
        let (engine, alpha) = seeded();
        let tree = engine.get_tree(&alpha).expect("tree should project");
        assert_eq!(tree.len(), 1);
        let flattened = crate::tree::flatten_paths(&tree);
        assert_eq!(flattened.len(), 7);
        assert!(flattened.contains(&"Equipment:Process:Vessel:Mixer".to_string()));
    }
}
