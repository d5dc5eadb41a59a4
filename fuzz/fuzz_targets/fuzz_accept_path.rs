//! Fuzz target for longest-path acceptance.
//!
//! Arbitrary flattened trees and prediction vectors, as a misbehaving
//! compute engine could return them, must never panic. Accepted paths must
//! be parent-linked chains starting below the root.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use specflow_core::tree::{accept_longest_path, TokenTreeNode};

#[derive(Debug, Arbitrary)]
struct Node {
    token: u8,
    parent: Option<u8>,
    depth: u8,
}

#[derive(Debug, Arbitrary)]
struct Input {
    nodes: Vec<Node>,
    predictions: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let tree: Vec<TokenTreeNode> = input
        .nodes
        .iter()
        .map(|n| match n.parent {
            None => TokenTreeNode::root(u32::from(n.token)),
            Some(p) => {
                TokenTreeNode::new(u32::from(n.token), usize::from(p), 0.0, usize::from(n.depth))
            }
        })
        .collect();
    let predictions: Vec<u32> = input.predictions.iter().map(|&p| u32::from(p)).collect();

    if let Ok(path) = accept_longest_path(&tree, &predictions) {
        let mut parent = 0;
        for &index in &path.nodes {
            assert_eq!(tree[index].parent_id, Some(parent));
            assert_eq!(tree[index].token_id, predictions[parent]);
            parent = index;
        }
        assert_eq!(path.bonus, predictions[path.last_index()]);
    }
});
