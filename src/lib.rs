#[cfg(feature = "api")]
pub mod api;
pub mod builder;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod engine;
pub mod error;
pub mod invariants;
pub mod models;
pub mod operations;
pub mod parser;
pub mod tree;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{HasPool, HierarchyApp};
    pub use crate::builder::{BuildOutcome, build_tree, recompute_paths};
    #[cfg(feature = "sqlx")]
    pub use crate::db::{
        clear_hierarchy, create_hierarchy_tables, delete_node, get_all_nodes, get_children,
        get_node_by_label, get_tree, rebuild_hierarchy, repair_hierarchy, update_node,
        validate_hierarchy,
    };
    pub use crate::engine::{EngineConfig, HierarchyEngine};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::invariants::{
        ensure_hierarchy_invariants, hierarchy_violations, repair, validation_report,
    };
    pub use crate::models::{
        HierarchyNode, HierarchyViolation, OrphanPolicy, PlantId, RebuildPayload, RebuildResult,
        RepairOutcome, TreeNode, TreeSnapshot, UpdateNodePayload, ValidationReport,
    };
    pub use crate::operations::{HierarchyOperation, HierarchyOperationResult, HierarchyOperations};
    pub use crate::parser::{ParsedPaths, PathRecord, expand_path, parse_paths};
    pub use crate::tree::{flatten_paths, tree_view};
}
