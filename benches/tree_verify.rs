//! Candidate tree benchmarks.
//!
//! Measures breadth-first flattening and longest-path acceptance on full
//! and sparse trees, plus one scheduler round on a full batch.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use specflow_core::batch::{BeamResult, VerifyBatch, VerifyResult};
use specflow_core::tree::{
    accept_longest_path, BeamCandidate, BeamTree, TokenId, MAX_BEAM_DEPTH, MAX_BEAM_WIDTH,
};
use specflow_core::{RequestManager, SchedulerConfig};

/// Tree of `depth` layers, `width` nodes each, every node hanging off the
/// first node of the layer above.
fn build_tree(width: usize, depth: usize) -> BeamTree {
    let mut tree = BeamTree::new();
    tree.reset(0);
    for d in 0..depth {
        let candidates: Vec<BeamCandidate> = (0..width)
            .map(|i| BeamCandidate::new((d * width + i + 1) as TokenId, -0.1 * i as f32, 0))
            .collect();
        let _ = tree.push_layer(&candidates);
    }
    tree
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_serialize");

    for (name, width) in [("narrow", 1), ("full", MAX_BEAM_WIDTH)] {
        let tree = build_tree(width, MAX_BEAM_DEPTH);
        group.throughput(Throughput::Elements(tree.num_nodes() as u64));
        group.bench_with_input(BenchmarkId::new("bfs", name), &tree, |b, t| {
            b.iter(|| black_box(t.serialize()))
        });
    }

    group.finish();
}

fn bench_accept(c: &mut Criterion) {
    let mut group = c.benchmark_group("accept_longest_path");

    let nodes = build_tree(MAX_BEAM_WIDTH, MAX_BEAM_DEPTH).serialize();
    // Every first-child chain is accepted.
    let all: Vec<TokenId> = nodes
        .iter()
        .map(|n| (n.depth * MAX_BEAM_WIDTH + 1) as TokenId)
        .collect();
    let none: Vec<TokenId> = vec![TokenId::MAX; nodes.len()];

    group.throughput(Throughput::Elements(nodes.len() as u64));
    group.bench_function("full_accept", |b| {
        b.iter(|| accept_longest_path(black_box(&nodes), black_box(&all)))
    });
    group.bench_function("full_reject", |b| {
        b.iter(|| accept_longest_path(black_box(&nodes), black_box(&none)))
    });

    group.finish();
}

fn bench_round(c: &mut Criterion) {
    let config = SchedulerConfig::default();
    let slots = config.max_requests;

    c.bench_function("speculative_round_8_slots", |b| {
        b.iter(|| {
            let mut m = RequestManager::new(config.clone()).unwrap();
            for i in 0..slots as TokenId {
                m.register(vec![i, i + 1], 64).unwrap();
            }
            let mut expand = m
                .prepare_next_batch_init(&VerifyBatch::new(slots), &VerifyResult::new(slots))
                .unwrap();
            while !expand.is_complete() {
                let mut beams = BeamResult::new(slots);
                for (slot, entry) in expand.slots.occupied() {
                    let candidates = (0..entry.beam_width)
                        .map(|i| BeamCandidate::new(i as TokenId, -0.1, 0))
                        .collect();
                    beams.set(slot, candidates);
                }
                expand = m.prepare_next_batch_beam(&expand, &beams).unwrap();
            }
            black_box(m.prepare_next_batch_verify(&expand).unwrap())
        })
    });
}

criterion_group!(benches, bench_serialize, bench_accept, bench_round);
criterion_main!(benches);
