use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::models::{HierarchyNode, TreeSnapshot};
use crate::parser::PathRecord;

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub snapshot: TreeSnapshot,
    /// Unique nodes in the committed snapshot.
    pub created: usize,
    /// Same-label/different-parent declarations resolved last-write-wins.
    pub conflicting_parents: usize,
    /// Labels whose parent walk never reached a root; excluded from the
    /// snapshot.
    pub cyclic_labels: Vec<String>,
}

/// Fold parsed prefix-chain records into the authoritative label-to-node
/// mapping for one tenant.
///
/// The first occurrence of a label wins its `display_order` (first-seen
/// sequence across the whole batch, starting at 0). A later declaration of
/// the same label under a different parent overwrites the parent link,
/// counted and logged, never fatal. `display_name` stays the label verbatim.
pub fn build_tree(
    records: impl IntoIterator<Item = PathRecord>,
    now: NaiveDateTime,
) -> BuildOutcome {
    let mut nodes: HashMap<String, HierarchyNode> = HashMap::new();
    let mut next_order: i32 = 0;
    let mut conflicting_parents = 0usize;

    for record in records {
        match nodes.get_mut(&record.label) {
            None => {
                nodes.insert(
                    record.label.clone(),
                    HierarchyNode::new(
                        record.label,
                        record.parent_label,
                        record.path,
                        next_order,
                        now,
                    ),
                );
                next_order += 1;
            }
            Some(existing) => {
                if existing.parent_label != record.parent_label {
                    tracing::warn!(
                        label = %record.label,
                        old_parent = ?existing.parent_label,
                        new_parent = ?record.parent_label,
                        "conflicting parent declaration; last write wins"
                    );
                    conflicting_parents += 1;
                    existing.parent_label = record.parent_label;
                    existing.path = record.path;
                }
            }
        }
    }

    let cyclic_labels = recompute_paths(&mut nodes);
    if !cyclic_labels.is_empty() {
        tracing::warn!(
            labels = ?cyclic_labels,
            "excluding nodes whose parent chains never reach a root"
        );
    }
    for label in &cyclic_labels {
        nodes.remove(label);
    }

    let mut snapshot = TreeSnapshot {
        nodes,
        ..TreeSnapshot::default()
    };
    snapshot.reindex();

    BuildOutcome {
        created: snapshot.len(),
        conflicting_parents,
        cyclic_labels,
        snapshot,
    }
}

/// Recompute every node's `path` by walking parent links root-ward.
///
/// The walk is bounded by the total node count, so a parent chain that loops
/// can never spin forever; labels on such chains are returned (sorted) and
/// their paths left untouched. A walk that hits a missing parent stops at
/// the orphan boundary; the validator reports the orphan itself.
pub fn recompute_paths(nodes: &mut HashMap<String, HierarchyNode>) -> Vec<String> {
    let hop_limit = nodes.len();
    let mut computed: HashMap<String, String> = HashMap::with_capacity(hop_limit);
    let mut cyclic = Vec::new();

    for (label, node) in nodes.iter() {
        let mut chain = vec![label.as_str()];
        let mut current = node.parent_label.as_deref();
        let mut hops = 0usize;
        let mut looped = false;

        while let Some(parent) = current {
            hops += 1;
            if hops > hop_limit {
                looped = true;
                break;
            }
            let Some(parent_node) = nodes.get(parent) else {
                break;
            };
            chain.push(parent);
            current = parent_node.parent_label.as_deref();
        }

        if looped {
            cyclic.push(label.clone());
            continue;
        }

        chain.reverse();
        computed.insert(label.clone(), chain.join(":"));
    }

    for (label, path) in computed {
        if let Some(node) = nodes.get_mut(&label) {
            node.path = path;
        }
    }

    cyclic.sort();
    cyclic
}
