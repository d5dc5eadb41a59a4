//! Fuzz target for beam tree growth.
//!
//! Pushes arbitrary candidate layers. Rejected layers must leave the tree
//! untouched and accepted ones must keep the grid invariants.

#![no_main]

use libfuzzer_sys::fuzz_target;
use specflow_core::tree::{BeamCandidate, BeamTree};

fuzz_target!(|layers: Vec<Vec<(u16, u8)>>| {
    let mut tree = BeamTree::new();
    tree.reset(0);
    for layer in layers {
        let candidates: Vec<BeamCandidate> = layer
            .iter()
            .map(|&(token, parent)| BeamCandidate::new(u32::from(token), -1.0, usize::from(parent)))
            .collect();
        let before = tree.serialize();
        if tree.push_layer(&candidates).is_err() {
            assert_eq!(tree.serialize(), before);
        }
        assert!(tree.check_invariants().is_ok());
        let flat = tree.serialize();
        for (i, node) in flat.iter().enumerate().skip(1) {
            let parent = node.parent_id.unwrap_or(usize::MAX);
            assert!(parent < i);
            assert_eq!(flat[parent].depth + 1, node.depth);
        }
    }
});
