use anyhow::anyhow;
use chrono::Utc;
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::builder::{build_tree, recompute_paths};
use crate::error::{LibError, Result};
use crate::invariants;
use crate::models::{
    HierarchyNode, OrphanPolicy, PlantId, RebuildResult, RepairOutcome, TreeNode, TreeSnapshot,
    UpdateNodePayload, ValidationReport,
};
use crate::parser::parse_paths;
use crate::tree::tree_view;

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_hierarchy_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct NodeRow {
    label: String,
    path: String,
    parent_label: Option<String>,
    display_name: String,
    display_order: i32,
    is_active: bool,
    icon_ref: Option<String>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl From<NodeRow> for HierarchyNode {
    fn from(value: NodeRow) -> Self {
        Self {
            label: value.label,
            path: value.path,
            parent_label: value.parent_label,
            display_name: value.display_name,
            display_order: value.display_order,
            is_active: value.is_active,
            icon_ref: value.icon_ref,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

const SELECT_NODE_COLUMNS: &str = r#"
    SELECT
        label,
        path,
        parent_label,
        display_name,
        display_order,
        is_active,
        icon_ref,
        created_at,
        updated_at
    FROM hierarchy.nodes
"#;

async fn load_snapshot(pool: &PgPool, plant: &PlantId) -> Result<TreeSnapshot> {
    let rows = sqlx::query_as::<_, NodeRow>(&format!(
        "{SELECT_NODE_COLUMNS} WHERE plant_id = $1 ORDER BY display_order ASC, label ASC"
    ))
    .bind(plant.as_str())
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query hierarchy nodes", err))?;

    let mut snapshot = TreeSnapshot::default();
    for row in rows {
        let node = HierarchyNode::from(row);
        snapshot.nodes.insert(node.label.clone(), node);
    }
    snapshot.reindex();
    Ok(snapshot)
}

async fn write_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    plant: &PlantId,
    snapshot: &TreeSnapshot,
) -> Result<()> {
    for node in snapshot.ordered_nodes() {
        sqlx::query(
            r#"
            INSERT INTO hierarchy.nodes (
                id,
                plant_id,
                label,
                path,
                parent_label,
                display_name,
                display_order,
                is_active,
                icon_ref,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(plant.as_str())
        .bind(&node.label)
        .bind(&node.path)
        .bind(&node.parent_label)
        .bind(&node.display_name)
        .bind(node.display_order)
        .bind(node.is_active)
        .bind(&node.icon_ref)
        .bind(node.created_at)
        .bind(node.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|err| db_err("Failed to write hierarchy nodes", err))?;
    }

    Ok(())
}

/// Destructively replace the plant's persisted tree from raw path strings.
///
/// The replacement set is parsed, built, and policy-checked in memory first;
/// the delete-then-insert then runs in one transaction, so either the full
/// set commits or none of it does.
pub async fn rebuild_hierarchy(
    pool: &PgPool,
    plant: &PlantId,
    raw_paths: &[String],
    policy: OrphanPolicy,
) -> Result<RebuildResult> {
    let now = Utc::now().naive_utc();
    let parsed = parse_paths(raw_paths.iter().map(String::as_str));
    let outcome = build_tree(parsed.records, now);

    let mut snapshot = outcome.snapshot;
    invariants::repair(&mut snapshot, policy, now)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    let deleted = sqlx::query(
        r#"
        DELETE FROM hierarchy.nodes
        WHERE plant_id = $1
        "#,
    )
    .bind(plant.as_str())
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to clear previous hierarchy", err))?
    .rows_affected() as usize;

    write_snapshot(&mut tx, plant, &snapshot).await?;

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    tracing::info!(
        plant = %plant,
        created = snapshot.len(),
        deleted,
        invalid = parsed.invalid_paths.len(),
        conflicts = outcome.conflicting_parents,
        cyclic = outcome.cyclic_labels.len(),
        "rebuilt persisted hierarchy"
    );

    Ok(RebuildResult {
        created: snapshot.len(),
        deleted,
        total_paths: parsed.total_paths,
        valid_paths: parsed.valid_paths,
        invalid_paths: parsed.invalid_paths.len(),
        conflicting_parents: outcome.conflicting_parents,
        cyclic_nodes: outcome.cyclic_labels.len(),
    })
}

pub async fn get_all_nodes(pool: &PgPool, plant: &PlantId) -> Result<Vec<HierarchyNode>> {
    let rows = sqlx::query_as::<_, NodeRow>(&format!(
        "{SELECT_NODE_COLUMNS} WHERE plant_id = $1 ORDER BY display_order ASC, label ASC"
    ))
    .bind(plant.as_str())
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query hierarchy nodes", err))?;

    Ok(rows.into_iter().map(HierarchyNode::from).collect())
}

pub async fn get_node_by_label(
    pool: &PgPool,
    plant: &PlantId,
    label: &str,
) -> Result<HierarchyNode> {
    let row = sqlx::query_as::<_, NodeRow>(&format!(
        "{SELECT_NODE_COLUMNS} WHERE plant_id = $1 AND label = $2 LIMIT 1"
    ))
    .bind(plant.as_str())
    .bind(label)
    .fetch_optional(pool)
    .await
    .map_err(|err| db_err("Failed to query hierarchy node", err))?;

    row.map(HierarchyNode::from).ok_or_else(|| {
        LibError::not_found(
            "Hierarchy node not found",
            anyhow!("label {} not found for plant {}", label, plant),
        )
    })
}

pub async fn get_children(
    pool: &PgPool,
    plant: &PlantId,
    parent_label: &str,
) -> Result<Vec<HierarchyNode>> {
    // The parent itself must exist; an unknown label is a miss, not an
    // empty child list.
    get_node_by_label(pool, plant, parent_label).await?;

    let rows = sqlx::query_as::<_, NodeRow>(&format!(
        "{SELECT_NODE_COLUMNS} WHERE plant_id = $1 AND parent_label = $2 ORDER BY display_order ASC, label ASC"
    ))
    .bind(plant.as_str())
    .bind(parent_label)
    .fetch_all(pool)
    .await
    .map_err(|err| db_err("Failed to query hierarchy children", err))?;

    Ok(rows.into_iter().map(HierarchyNode::from).collect())
}

pub async fn get_tree(pool: &PgPool, plant: &PlantId) -> Result<Vec<TreeNode>> {
    let snapshot = load_snapshot(pool, plant).await?;
    Ok(tree_view(&snapshot))
}

/// Apply a partial update to one persisted node. Returns the applied field
/// names.
///
/// Reparenting is validated against the loaded snapshot (parent must exist,
/// no descendant cycles) and descendant paths are rewritten in the same
/// transaction as the node row.
pub async fn update_node(
    pool: &PgPool,
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

    let mut snapshot = load_snapshot(pool, plant).await?;
    if !snapshot.contains(label) {
        return Err(LibError::not_found(
            "Hierarchy node not found",
            anyhow!("label {} not found for plant {}", label, plant),
        ));
    }

    if let Some(Some(new_parent)) = &payload.parent_label {
        if new_parent == label {
            return Err(LibError::invalid_with_code(
                "hierarchy_cycle",
                "Node cannot be its own parent",
                anyhow!("self-parent for label {}", label),
            ));
        }
        if !snapshot.contains(new_parent) {
            return Err(LibError::invalid_with_code(
                "hierarchy_orphaned_node",
                "New parent label does not exist",
                anyhow!("parent {} not found for label {}", new_parent, label),
            ));
        }
        if snapshot.descendants(label).contains(new_parent) {
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
    let old_paths: std::collections::HashMap<String, String> = snapshot
        .nodes
        .iter()
        .map(|(key, node)| (key.clone(), node.path.clone()))
        .collect();

    {
        let node = snapshot
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
        recompute_paths(&mut snapshot.nodes);
        snapshot.reindex();
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    let updated = snapshot
        .get(label)
        .expect("node checked present above")
        .clone();
    sqlx::query(
        r#"
        UPDATE hierarchy.nodes
        SET path = $1,
            parent_label = $2,
            display_name = $3,
            display_order = $4,
            is_active = $5,
            icon_ref = $6,
            updated_at = $7
        WHERE plant_id = $8
          AND label = $9
        "#,
    )
    .bind(&updated.path)
    .bind(&updated.parent_label)
    .bind(&updated.display_name)
    .bind(updated.display_order)
    .bind(updated.is_active)
    .bind(&updated.icon_ref)
    .bind(updated.updated_at)
    .bind(plant.as_str())
    .bind(label)
    .execute(&mut *tx)
    .await
    .map_err(|err| db_err("Failed to update hierarchy node", err))?;

    // Descendant paths follow the reparented node.
    for (key, node) in &snapshot.nodes {
        if key == label {
            continue;
        }
        if old_paths.get(key) != Some(&node.path) {
            sqlx::query(
                r#"
                UPDATE hierarchy.nodes
                SET path = $1,
                    updated_at = $2
                WHERE plant_id = $3
                  AND label = $4
                "#,
            )
            .bind(&node.path)
            .bind(now)
            .bind(plant.as_str())
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(|err| db_err("Failed to update descendant paths", err))?;
        }
    }

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    Ok(fields)
}

/// Delete a node and every descendant. Returns the number of rows removed.
pub async fn delete_node(pool: &PgPool, plant: &PlantId, label: &str) -> Result<usize> {
    let snapshot = load_snapshot(pool, plant).await?;
    if !snapshot.contains(label) {
        return Err(LibError::not_found(
            "Hierarchy node not found",
            anyhow!("label {} not found for plant {}", label, plant),
        ));
    }

    let mut doomed = snapshot.descendants(label);
    doomed.push(label.to_string());

    let deleted = sqlx::query(
        r#"
        DELETE FROM hierarchy.nodes
        WHERE plant_id = $1
          AND label = ANY($2)
        "#,
    )
    .bind(plant.as_str())
    .bind(&doomed)
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to delete hierarchy nodes", err))?
    .rows_affected() as usize;

    Ok(deleted)
}

pub async fn clear_hierarchy(pool: &PgPool, plant: &PlantId) -> Result<usize> {
    let deleted = sqlx::query(
        r#"
        DELETE FROM hierarchy.nodes
        WHERE plant_id = $1
        "#,
    )
    .bind(plant.as_str())
    .execute(pool)
    .await
    .map_err(|err| db_err("Failed to clear hierarchy", err))?
    .rows_affected() as usize;

    tracing::info!(plant = %plant, deleted, "cleared persisted hierarchy");
    Ok(deleted)
}

pub async fn validate_hierarchy(pool: &PgPool, plant: &PlantId) -> Result<ValidationReport> {
    let snapshot = load_snapshot(pool, plant).await?;
    Ok(invariants::validation_report(&snapshot))
}

/// Apply the orphan policy to the persisted tree and re-validate. Repaired
/// rows are written in one transaction.
pub async fn repair_hierarchy(
    pool: &PgPool,
    plant: &PlantId,
    policy: OrphanPolicy,
) -> Result<RepairOutcome> {
    let now = Utc::now().naive_utc();
    let mut snapshot = load_snapshot(pool, plant).await?;
    let before = snapshot.clone();

    let outcome = invariants::repair(&mut snapshot, policy, now)?;
    if outcome.repaired_orphans == 0 {
        return Ok(outcome);
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| db_err("Failed to start transaction", err))?;

    for (key, node) in &snapshot.nodes {
        let changed = before
            .get(key)
            .is_none_or(|old| old.parent_label != node.parent_label || old.path != node.path);
        if !changed {
            continue;
        }

        sqlx::query(
            r#"
            UPDATE hierarchy.nodes
            SET parent_label = $1,
                path = $2,
                updated_at = $3
            WHERE plant_id = $4
              AND label = $5
            "#,
        )
        .bind(&node.parent_label)
        .bind(&node.path)
        .bind(now)
        .bind(plant.as_str())
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to persist repaired nodes", err))?;
    }

    tx.commit()
        .await
        .map_err(|err| db_err("Failed to commit transaction", err))?;

    Ok(outcome)
}
