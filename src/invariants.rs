use std::collections::HashSet;

use anyhow::anyhow;
use chrono::NaiveDateTime;

use crate::builder::recompute_paths;
use crate::error::{LibError, Result};
use crate::models::{
    HierarchyViolation, OrphanPolicy, RepairOutcome, TreeSnapshot, ValidationReport,
};

/// Read-only integrity pass over a candidate snapshot.
///
/// Violations come out in a deterministic order: duplicate labels first
/// (those indicate a builder bug, not user input), then orphans sorted by
/// label, then one entry per distinct parent-link cycle.
pub fn hierarchy_violations(snapshot: &TreeSnapshot) -> Vec<HierarchyViolation> {
    let mut labels: Vec<&String> = snapshot.nodes.keys().collect();
    labels.sort();

    let mut violations = Vec::new();

    for label in &labels {
        let node = &snapshot.nodes[*label];
        if node.label != **label {
            violations.push(HierarchyViolation::DuplicateLabel {
                label: node.label.clone(),
            });
        }
    }

    for label in &labels {
        let node = &snapshot.nodes[*label];
        if let Some(parent) = &node.parent_label {
            if !snapshot.contains(parent) {
                violations.push(HierarchyViolation::OrphanedNode {
                    label: (*label).clone(),
                    missing_parent: parent.clone(),
                });
            }
        }
    }

    let mut attributed: HashSet<String> = HashSet::new();
    for label in &labels {
        if attributed.contains(label.as_str()) {
            continue;
        }
        if let Some(members) = cycle_members(snapshot, label) {
            if members.iter().any(|member| attributed.contains(member)) {
                continue;
            }
            for member in &members {
                attributed.insert(member.clone());
            }
            violations.push(HierarchyViolation::CycleDetected { labels: members });
        }
    }

    violations
}

/// Walk parent links from `start` with a visited set, so the walk is bounded
/// by the node count. Returns the sorted labels on the cycle if the walk
/// revisits one.
fn cycle_members(snapshot: &TreeSnapshot, start: &str) -> Option<Vec<String>> {
    let mut walk: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut current = snapshot.nodes.get_key_value(start).map(|(key, _)| key.as_str());

    while let Some(label) = current {
        if seen.contains(label) {
            let first = walk.iter().position(|visited| *visited == label)?;
            let mut members: Vec<String> = walk[first..]
                .iter()
                .map(|member| member.to_string())
                .collect();
            members.sort();
            return Some(members);
        }
        seen.insert(label);
        walk.push(label);

        current = snapshot
            .get(label)
            .and_then(|node| node.parent_label.as_deref())
            .filter(|parent| snapshot.contains(parent));
    }

    None
}

pub fn validation_report(snapshot: &TreeSnapshot) -> ValidationReport {
    let violations = hierarchy_violations(snapshot);
    let orphaned_count = violations
        .iter()
        .filter(|violation| matches!(violation, HierarchyViolation::OrphanedNode { .. }))
        .count();
    let cycle_count = violations
        .iter()
        .filter(|violation| matches!(violation, HierarchyViolation::CycleDetected { .. }))
        .count();

    ValidationReport {
        is_valid: violations.is_empty(),
        total_records: snapshot.len(),
        orphaned_count,
        cycle_count,
        violations,
    }
}

pub fn ensure_hierarchy_invariants(snapshot: &TreeSnapshot) -> Result<()> {
    let violations = hierarchy_violations(snapshot);
    if let Some(first) = violations.first() {
        return Err(LibError::invalid_with_code(
            first.error_code(),
            first.public_message(),
            anyhow!("hierarchy invariant validation failed: {:?}", violations),
        ));
    }

    Ok(())
}

/// Apply the orphan policy to a snapshot and re-validate.
///
/// With `RepairToRoot`, orphans are reattached at the root and paths
/// recomputed. With `Reject`, any orphan fails the operation and the
/// snapshot is left untouched. Cycles are reported, never broken here.
pub fn repair(
    snapshot: &mut TreeSnapshot,
    policy: OrphanPolicy,
    now: NaiveDateTime,
) -> Result<RepairOutcome> {
    let orphans: Vec<String> = snapshot
        .nodes
        .values()
        .filter(|node| {
            node.parent_label
                .as_deref()
                .is_some_and(|parent| !snapshot.contains(parent))
        })
        .map(|node| node.label.clone())
        .collect();

    if policy == OrphanPolicy::Reject && !orphans.is_empty() {
        let mut sorted = orphans;
        sorted.sort();
        return Err(LibError::invalid_with_code(
            "hierarchy_orphaned_node",
            "Node references a parent label that does not exist",
            anyhow!(
                "orphan policy rejects batch with orphaned labels {:?}",
                sorted
            ),
        ));
    }

    let repaired_orphans = orphans.len();
    for label in orphans {
        if let Some(node) = snapshot.nodes.get_mut(&label) {
            node.parent_label = None;
            node.updated_at = now;
        }
    }

    if repaired_orphans > 0 {
        recompute_paths(&mut snapshot.nodes);
        snapshot.reindex();
    }

    Ok(RepairOutcome {
        repaired_orphans,
        report: validation_report(snapshot),
    })
}
