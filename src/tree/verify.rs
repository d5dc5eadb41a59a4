//! Longest-accepted-path search over a serialized candidate tree.

use super::{TokenId, TokenTreeNode, TreeError};

/// Outcome of reconciling one candidate tree with the verify model's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPath {
    /// Flat indices of the accepted nodes, root excluded, shallowest first.
    pub nodes: Vec<usize>,
    /// Verify model's prediction at the deepest accepted node.
    pub bonus: TokenId,
}

impl AcceptedPath {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Flat index of the deepest accepted node (the root when nothing else was).
    pub fn last_index(&self) -> usize {
        self.nodes.last().copied().unwrap_or(0)
    }
}

/// Find the longest path of accepted nodes in `tree`.
///
/// `predictions[i]` is the verify model's most likely continuation after
/// node `i`. The root is accepted unconditionally; any other node is
/// accepted iff its parent was accepted and the prediction at the parent
/// equals the node's token. Among accepted paths of maximal length the one
/// discovered first in breadth-first order wins.
pub fn accept_longest_path(
    tree: &[TokenTreeNode],
    predictions: &[TokenId],
) -> Result<AcceptedPath, TreeError> {
    match tree.first() {
        Some(root) if root.is_root() && root.depth == 0 => {}
        _ => return Err(TreeError::MissingRoot),
    }
    if predictions.len() != tree.len() {
        return Err(TreeError::PredictionCount {
            expected: tree.len(),
            actual: predictions.len(),
        });
    }

    let mut accepted = vec![false; tree.len()];
    accepted[0] = true;
    let mut best = 0;

    for (i, node) in tree.iter().enumerate().skip(1) {
        // Breadth-first order guarantees the parent was visited already.
        let parent = match node.parent_id {
            Some(p) if p < i && tree[p].depth + 1 == node.depth => p,
            Some(p) => return Err(TreeError::OrphanParent { depth: node.depth, parent: p }),
            None => return Err(TreeError::MissingRoot),
        };
        if accepted[parent] && predictions[parent] == node.token_id {
            accepted[i] = true;
            if node.depth > tree[best].depth {
                best = i;
            }
        }
    }

    let mut nodes = Vec::with_capacity(tree[best].depth);
    let mut cursor = best;
    while let Some(parent) = tree[cursor].parent_id {
        nodes.push(cursor);
        cursor = parent;
    }
    nodes.reverse();

    Ok(AcceptedPath { nodes, bonus: predictions[best] })
}
