//! Benchmarks for interning and stepping.
//!
//! These establish baselines for the two hot paths: hash-consing term trees
//! into the store, and driving the runtime through an expansion chain.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use octave::prelude::*;

/// Builds a balanced tree with the given depth and fanout.
fn balanced_tree(depth: usize, fanout: usize, scale: u32) -> Term {
    if depth == 0 {
        return Term::leaf(format!("leaf{}", scale), scale);
    }
    let children = (0..fanout)
        .map(|i| {
            let mut child = balanced_tree(depth - 1, fanout, scale);
            child.sym = format!("{}-{}", child.sym, i);
            child
        })
        .collect();
    Term::new(format!("node{}", depth), scale, children)
}

/// Benchmarks interning a ~3k-node tree with heavy structural sharing.
fn bench_intern_balanced_tree(c: &mut Criterion) {
    let tree = balanced_tree(7, 3, 0);
    c.bench_function("intern_balanced_tree_depth7_fanout3", |b| {
        b.iter(|| {
            let mut store = TermStore::new();
            store.intern(black_box(&tree)).unwrap()
        });
    });
}

/// Benchmarks re-interning, which exercises only the content index.
fn bench_reintern_hits_index(c: &mut Criterion) {
    let tree = balanced_tree(7, 3, 0);
    let mut store = TermStore::new();
    store.intern(&tree).unwrap();
    c.bench_function("reintern_balanced_tree_depth7_fanout3", |b| {
        b.iter(|| store.intern(black_box(&tree)).unwrap());
    });
}

/// Benchmarks a 256-step expansion chain under the FIFO scheduler.
fn bench_expansion_chain(c: &mut Criterion) {
    let program = Program::new(
        "chain",
        Term::leaf("seed", 0),
        vec![Rule::new("grow", Pattern::default(), Action::Expand { fanout: 1 })],
    )
    .with_max_steps(256);
    let interpreter = Interpreter::new();
    c.bench_function("expansion_chain_256_steps", |b| {
        b.iter(|| {
            let execution =
                interpreter.run(black_box(&program), &RunOptions::default()).unwrap();
            assert_eq!(execution.events.len(), 256);
        });
    });
}

criterion_group!(
    benches,
    bench_intern_balanced_tree,
    bench_reintern_hits_index,
    bench_expansion_chain
);
criterion_main!(benches);
