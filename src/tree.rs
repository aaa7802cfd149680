use crate::models::{TreeNode, TreeSnapshot};

/// Project a committed snapshot into the nested presentation view: roots
/// first, children recursive, siblings ordered by `display_order`.
///
/// Pure and recomputed on demand. Callers that want caching own both the
/// cache and its invalidation.
pub fn tree_view(snapshot: &TreeSnapshot) -> Vec<TreeNode> {
    snapshot
        .roots
        .iter()
        .filter_map(|root| subtree(snapshot, root))
        .collect()
}

fn subtree(snapshot: &TreeSnapshot, label: &str) -> Option<TreeNode> {
    let node = snapshot.get(label)?.clone();
    let children = snapshot
        .children_of(label)
        .iter()
        .filter_map(|child| subtree(snapshot, child))
        .collect();

    Some(TreeNode { node, children })
}

/// Flatten a tree view back into the colon-delimited path of every node,
/// depth-first in display order. The result is the ancestor closure of the
/// paths the tree was built from.
pub fn flatten_paths(tree: &[TreeNode]) -> Vec<String> {
    let mut paths = Vec::new();
    for root in tree {
        collect_paths(root, &mut paths);
    }
    paths
}

fn collect_paths(node: &TreeNode, paths: &mut Vec<String>) {
    paths.push(node.node.path.clone());
    for child in &node.children {
        collect_paths(child, paths);
    }
}
