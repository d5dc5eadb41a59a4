//! Fixed-capacity beam tree grid and the per-slot arena.

use serde::{Deserialize, Serialize};

use super::{TokenId, TokenTreeNode, TreeError, MAX_BEAM_DEPTH, MAX_BEAM_WIDTH};

/// Candidate continuation proposed by a draft model for one frontier node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamCandidate {
    pub token_id: TokenId,
    pub log_prob: f32,
    /// Index of the extended node within the current frontier layer.
    pub parent: usize,
}

impl BeamCandidate {
    pub fn new(token_id: TokenId, log_prob: f32, parent: usize) -> Self {
        Self { token_id, log_prob, parent }
    }
}

/// Occupied cell of the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamNode {
    pub token_id: TokenId,
    /// Index into the previous layer. Zero for the root.
    pub parent: usize,
    pub log_prob: f32,
}

/// One depth level of the grid. Occupied cells are packed from index 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeLayer {
    nodes: [Option<BeamNode>; MAX_BEAM_WIDTH],
}

impl TreeLayer {
    pub fn len(&self) -> usize {
        self.nodes.iter().take_while(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].is_none()
    }

    pub fn get(&self, index: usize) -> Option<&BeamNode> {
        self.nodes.get(index)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BeamNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map_while(|(i, n)| n.as_ref().map(|node| (i, node)))
    }

    fn clear(&mut self) {
        self.nodes = [None; MAX_BEAM_WIDTH];
    }
}

/// Candidate tree for one request slot.
///
/// Layer 0 holds exactly one node (the root, the last confirmed token);
/// every node in layer `d > 0` points at an occupied node in layer `d - 1`.
#[derive(Debug, Clone, Default)]
pub struct BeamTree {
    layers: [TreeLayer; MAX_BEAM_DEPTH + 1],
    depth: usize,
}

impl BeamTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard every layer and re-root the tree at `root`.
    pub fn reset(&mut self, root: TokenId) {
        self.clear();
        self.layers[0].nodes[0] = Some(BeamNode { token_id: root, parent: 0, log_prob: 0.0 });
    }

    /// Discard every layer, leaving the tree without a root.
    pub fn clear(&mut self) {
        for layer in &mut self.layers {
            layer.clear();
        }
        self.depth = 0;
    }

    pub fn root(&self) -> Option<TokenId> {
        self.layers[0].get(0).map(|n| n.token_id)
    }

    /// Depth of the current frontier (0 when only the root exists).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn layer(&self, depth: usize) -> Option<&TreeLayer> {
        if depth > self.depth {
            return None;
        }
        self.layers.get(depth)
    }

    /// Nodes of the deepest layer.
    pub fn frontier(&self) -> &TreeLayer {
        &self.layers[self.depth]
    }

    pub fn num_nodes(&self) -> usize {
        self.layers[..=self.depth].iter().map(TreeLayer::len).sum()
    }

    /// Append a layer below the frontier. Validation happens before any write,
    /// so a rejected layer leaves the tree untouched. An empty layer is a
    /// no-op and returns the current depth.
    pub fn push_layer(&mut self, candidates: &[BeamCandidate]) -> Result<usize, TreeError> {
        if self.root().is_none() {
            return Err(TreeError::MissingRoot);
        }
        if candidates.is_empty() {
            return Ok(self.depth);
        }
        let depth = self.depth + 1;
        if depth > MAX_BEAM_DEPTH {
            return Err(TreeError::DepthExceeded { depth, max: MAX_BEAM_DEPTH });
        }
        if candidates.len() > MAX_BEAM_WIDTH {
            return Err(TreeError::LayerFull {
                depth,
                count: candidates.len(),
                capacity: MAX_BEAM_WIDTH,
            });
        }
        let frontier = self.frontier();
        for c in candidates {
            if frontier.get(c.parent).is_none() {
                return Err(TreeError::OrphanParent { depth, parent: c.parent });
            }
        }

        let layer = &mut self.layers[depth];
        layer.clear();
        for (slot, c) in candidates.iter().enumerate() {
            layer.nodes[slot] = Some(BeamNode {
                token_id: c.token_id,
                parent: c.parent,
                log_prob: c.log_prob,
            });
        }
        self.depth = depth;
        Ok(depth)
    }

    /// Flatten breadth-first (by depth, then left to right within a layer).
    ///
    /// The verify model's output is interpreted against this exact order.
    pub fn serialize(&self) -> Vec<TokenTreeNode> {
        let mut out = Vec::with_capacity(self.num_nodes());
        let Some(root) = self.root() else {
            return out;
        };
        out.push(TokenTreeNode::root(root));

        // Flat index of the first node of the previous layer.
        let mut prev_base = 0;
        for depth in 1..=self.depth {
            let base = out.len();
            for (_, node) in self.layers[depth].iter() {
                out.push(TokenTreeNode::new(
                    node.token_id,
                    prev_base + node.parent,
                    node.log_prob,
                    depth,
                ));
            }
            prev_base = base;
        }
        out
    }

    /// Check the structural invariants of the grid.
    pub fn check_invariants(&self) -> Result<(), TreeError> {
        if self.layers[0].len() != 1 {
            return Err(TreeError::MissingRoot);
        }
        for depth in 1..=self.depth {
            let parents = &self.layers[depth - 1];
            for (_, node) in self.layers[depth].iter() {
                if parents.get(node.parent).is_none() {
                    return Err(TreeError::OrphanParent { depth, parent: node.parent });
                }
            }
        }
        for depth in self.depth + 1..=MAX_BEAM_DEPTH {
            if !self.layers[depth].is_empty() {
                return Err(TreeError::DepthExceeded { depth, max: self.depth });
            }
        }
        Ok(())
    }
}

/// One beam tree per batch slot, reused in place across requests.
#[derive(Debug)]
pub struct BeamTreeArena {
    trees: Vec<BeamTree>,
}

impl BeamTreeArena {
    pub fn new(slots: usize) -> Self {
        Self { trees: vec![BeamTree::new(); slots] }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// Re-root the tree at `slot`. Returns false if the slot does not exist.
    pub fn reset(&mut self, slot: usize, root: TokenId) -> bool {
        match self.trees.get_mut(slot) {
            Some(tree) => {
                tree.reset(root);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, slot: usize) -> Option<&BeamTree> {
        self.trees.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut BeamTree> {
        self.trees.get_mut(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(token: TokenId, parent: usize) -> BeamCandidate {
        BeamCandidate::new(token, -0.5, parent)
    }

    #[test]
    fn reset_installs_single_root() {
        let mut tree = BeamTree::new();
        tree.reset(42);
        assert_eq!(tree.root(), Some(42));
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.num_nodes(), 1);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn push_layer_rejects_orphan_parent() {
        let mut tree = BeamTree::new();
        tree.reset(1);
        let err = tree.push_layer(&[cand(2, 1)]).unwrap_err();
        assert_eq!(err, TreeError::OrphanParent { depth: 1, parent: 1 });
        assert_eq!(tree.depth(), 0, "rejected layer must not be written");
    }

    #[test]
    fn push_layer_rejects_overfull_layer() {
        let mut tree = BeamTree::new();
        tree.reset(1);
        let too_many: Vec<_> = (0..=MAX_BEAM_WIDTH as u32).map(|t| cand(t, 0)).collect();
        assert!(matches!(
            tree.push_layer(&too_many),
            Err(TreeError::LayerFull { .. })
        ));
    }

    #[test]
    fn empty_layer_keeps_the_frontier() {
        let mut tree = BeamTree::new();
        tree.reset(1);
        tree.push_layer(&[cand(2, 0)]).unwrap();
        assert_eq!(tree.push_layer(&[]), Ok(1));
        assert_eq!(tree.depth(), 1);
        // The next layer still hangs off the old frontier.
        assert_eq!(tree.push_layer(&[cand(3, 0)]), Ok(2));
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn push_layer_requires_root() {
        let mut tree = BeamTree::new();
        assert_eq!(tree.push_layer(&[cand(2, 0)]), Err(TreeError::MissingRoot));
    }

    #[test]
    fn depth_is_bounded() {
        let mut tree = BeamTree::new();
        tree.reset(0);
        for d in 1..=MAX_BEAM_DEPTH {
            assert_eq!(tree.push_layer(&[cand(d as u32, 0)]), Ok(d));
        }
        assert!(matches!(
            tree.push_layer(&[cand(99, 0)]),
            Err(TreeError::DepthExceeded { .. })
        ));
    }

    #[test]
    fn serialize_is_breadth_first_with_flat_parents() {
        let mut tree = BeamTree::new();
        tree.reset(10);
        tree.push_layer(&[cand(11, 0), cand(12, 0)]).unwrap();
        tree.push_layer(&[cand(13, 1), cand(14, 0), cand(15, 1)]).unwrap();

        let flat = tree.serialize();
        let tokens: Vec<_> = flat.iter().map(|n| n.token_id).collect();
        let parents: Vec<_> = flat.iter().map(|n| n.parent_id).collect();
        let depths: Vec<_> = flat.iter().map(|n| n.depth).collect();

        assert_eq!(tokens, vec![10, 11, 12, 13, 14, 15]);
        assert_eq!(parents, vec![None, Some(0), Some(0), Some(2), Some(1), Some(2)]);
        assert_eq!(depths, vec![0, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn reset_clears_previous_request() {
        let mut tree = BeamTree::new();
        tree.reset(1);
        tree.push_layer(&[cand(2, 0), cand(3, 0)]).unwrap();
        tree.reset(7);
        assert_eq!(tree.serialize(), vec![TokenTreeNode::root(7)]);
        assert!(tree.layer(1).is_none());
    }

    #[test]
    fn arena_reset_out_of_range() {
        let mut arena = BeamTreeArena::new(2);
        assert!(arena.reset(1, 5));
        assert!(!arena.reset(2, 5));
        assert_eq!(arena.get(1).and_then(BeamTree::root), Some(5));
    }
}
