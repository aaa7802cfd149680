use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::HierarchyEngine;
use crate::error::Result;
use crate::models::{
    HierarchyNode, PlantId, RebuildResult, TreeNode, UpdateNodePayload, ValidationReport,
};

/// High-level hierarchy actions keyed by tenant, for hosts that route
/// serialized commands (job queues, tool interfaces) rather than calling the
/// engine directly.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum HierarchyOperation {
    Rebuild {
        plant_id: PlantId,
        paths: Vec<String>,
    },
    GetAll {
        plant_id: PlantId,
    },
    GetTree {
        plant_id: PlantId,
    },
    GetNode {
        plant_id: PlantId,
        label: String,
    },
    GetChildren {
        plant_id: PlantId,
        parent_label: String,
    },
    Update {
        plant_id: PlantId,
        label: String,
        payload: UpdateNodePayload,
    },
    Delete {
        plant_id: PlantId,
        label: String,
    },
    Clear {
        plant_id: PlantId,
    },
    Validate {
        plant_id: PlantId,
    },
    Repair {
        plant_id: PlantId,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HierarchyOperationResult {
    Rebuilt {
        result: RebuildResult,
    },
    Nodes {
        total: usize,
        items: Vec<HierarchyNode>,
    },
    Tree {
        total_roots: usize,
        roots: Vec<TreeNode>,
    },
    Node {
        node: HierarchyNode,
    },
    Updated {
        label: String,
        updated_fields: Vec<&'static str>,
    },
    Deleted {
        deleted_count: usize,
    },
    Cleared {
        deleted_count: usize,
    },
    Report {
        report: ValidationReport,
    },
    Repaired {
        repaired_orphans: usize,
        report: ValidationReport,
    },
}

#[derive(Clone)]
pub struct HierarchyOperations {
    engine: Arc<HierarchyEngine>,
}

impl HierarchyOperations {
    pub fn new(engine: Arc<HierarchyEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> Arc<HierarchyEngine> {
        Arc::clone(&self.engine)
    }

    pub fn execute(&self, operation: HierarchyOperation) -> Result<HierarchyOperationResult> {
        match operation {
            HierarchyOperation::Rebuild { plant_id, paths } => {
                let result = self.engine.rebuild(&plant_id, &paths)?;
                Ok(HierarchyOperationResult::Rebuilt { result })
            }
            HierarchyOperation::GetAll { plant_id } => {
                let items = self.engine.get_all(&plant_id)?;
                Ok(HierarchyOperationResult::Nodes {
                    total: items.len(),
                    items,
                })
            }
            HierarchyOperation::GetTree { plant_id } => {
                let roots = self.engine.get_tree(&plant_id)?;
                Ok(HierarchyOperationResult::Tree {
                    total_roots: roots.len(),
                    roots,
                })
            }
            HierarchyOperation::GetNode { plant_id, label } => {
                let node = self.engine.get_by_label(&plant_id, &label)?;
                Ok(HierarchyOperationResult::Node { node })
            }
            HierarchyOperation::GetChildren {
                plant_id,
                parent_label,
            } => {
                let items = self.engine.get_children(&plant_id, &parent_label)?;
                Ok(HierarchyOperationResult::Nodes {
                    total: items.len(),
                    items,
                })
            }
            HierarchyOperation::Update {
                plant_id,
                label,
                payload,
            } => {
                let updated_fields = self.engine.update(&plant_id, &label, payload)?;
                Ok(HierarchyOperationResult::Updated {
                    label,
                    updated_fields,
                })
            }
            HierarchyOperation::Delete { plant_id, label } => {
                let deleted_count = self.engine.delete(&plant_id, &label)?;
                Ok(HierarchyOperationResult::Deleted { deleted_count })
            }
            HierarchyOperation::Clear { plant_id } => {
                let deleted_count = self.engine.clear(&plant_id)?;
                Ok(HierarchyOperationResult::Cleared { deleted_count })
            }
            HierarchyOperation::Validate { plant_id } => {
                let report = self.engine.validate(&plant_id)?;
                Ok(HierarchyOperationResult::Report { report })
            }
            HierarchyOperation::Repair { plant_id } => {
                let outcome = self.engine.repair(&plant_id)?;
                Ok(HierarchyOperationResult::Repaired {
                    repaired_orphans: outcome.repaired_orphans,
                    report: outcome.report,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn operations() -> HierarchyOperations {
        HierarchyOperations::new(Arc::new(HierarchyEngine::new()))
    }

    fn rebuild_op(paths: &[&str]) -> HierarchyOperation {
        serde_json::from_value(json!({
            "operation": "rebuild",
            "plant_id": "alpha",
            "paths": paths,
        }))
        .expect("operation should deserialize")
    }

    #[test]
    fn rebuild_then_query_through_the_facade() {
        let ops = operations();
        let result = ops
            .execute(rebuild_op(&["Equipment:Process", "Equipment:Safety"]))
            .expect("rebuild should succeed");
        match result {
            HierarchyOperationResult::Rebuilt { result } => {
                assert_eq!(result.created, 3);
                assert_eq!(result.valid_paths, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let listed = ops
            .execute(serde_json::from_value(json!({
                "operation": "get_children",
                "plant_id": "alpha",
                "parent_label": "Equipment",
            })).expect("operation should deserialize"))
            .expect("get_children should succeed");
        match listed {
            HierarchyOperationResult::Nodes { total, items } => {
                assert_eq!(total, 2);
                assert_eq!(items[0].label, "Process");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn update_operation_carries_the_partial_payload() {
        let ops = operations();
        ops.execute(rebuild_op(&["Equipment:Process"]))
            .expect("rebuild should succeed");

        let updated = ops
            .execute(serde_json::from_value(json!({
                "operation": "update",
                "plant_id": "alpha",
                "label": "Process",
                "payload": { "displayName": "Processing" },
            })).expect("operation should deserialize"))
            .expect("update should succeed");
        match updated {
            HierarchyOperationResult::Updated { label, updated_fields } => {
                assert_eq!(label, "Process");
                assert_eq!(updated_fields, ["display_name"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn validate_operation_serializes_a_report() {
        let ops = operations();
        ops.execute(rebuild_op(&["Equipment:Process"]))
            .expect("rebuild should succeed");

        let result = ops
            .execute(serde_json::from_value(json!({
                "operation": "validate",
                "plant_id": "alpha",
            })).expect("operation should deserialize"))
            .expect("validate should succeed");
        let serialized = serde_json::to_value(&result).expect("result should serialize");
        assert_eq!(serialized["kind"], "report");
        assert_eq!(serialized["report"]["isValid"], true);
        assert_eq!(serialized["report"]["totalRecords"], 2);
    }

    #[test]
    fn rebuild_result_serializes_with_the_kind_tag() {
        let ops = operations();
        let result = ops
            .execute(rebuild_op(&["Equipment:Process"]))
            .expect("rebuild should succeed");

        let serialized = serde_json::to_value(&result).expect("result should serialize");
        assert_eq!(serialized["kind"], "rebuilt");
        assert_eq!(serialized["result"]["created"], 2);
    }

    #[test]
    fn blank_plant_id_fails_to_deserialize() {
        serde_json::from_value::<HierarchyOperation>(json!({
            "operation": "rebuild",
            "plant_id": "",
            "paths": ["Equipment"],
        }))
        .expect_err("blank plant id should be rejected");

        serde_json::from_value::<HierarchyOperation>(json!({
            "operation": "clear",
            "plant_id": "   ",
        }))
        .expect_err("whitespace plant id should be rejected");
    }
}
