//! Benchmark: joint log-probability after a single latent update.
//!
//! Compares:
//! - a fully cached model, where nothing recomputes
//! - an update of one rate, where only its descendants recompute
//! - a move of the changepoint index across the data

use std::hint::black_box;

use bayesgraph_core::density::{poisson_logp, DiscreteUniform, Exponential, FnDensity};
use bayesgraph_core::{ModelGraph, NodeBuilder, NodeId};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

const DISASTERS: [i64; 111] = [
    4, 5, 4, 0, 1, 4, 3, 4, 0, 6, 3, 3, 4, 0, 2, 6, 3, 3, 5, 4, 5, 3, 1, 4, 4, 1, 5, 5, 3, 4, 2,
    5, 2, 2, 3, 4, 2, 1, 3, 2, 2, 1, 1, 1, 1, 3, 0, 0, 1, 0, 1, 1, 0, 0, 3, 1, 0, 3, 2, 2, 0, 1,
    1, 1, 0, 1, 0, 1, 0, 0, 0, 2, 1, 0, 0, 0, 1, 1, 0, 2, 3, 3, 1, 1, 2, 1, 1, 1, 1, 2, 4, 2, 0,
    0, 1, 4, 0, 0, 0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 1, 0, 1,
];

/// Changepoint model with `copies` independent data nodes sharing the
/// same latents.
fn changepoint(copies: usize) -> (ModelGraph, NodeId, NodeId) {
    let mut graph = ModelGraph::with_seed(0);
    let s = NodeBuilder::stochastic("s", DiscreteUniform)
        .parent("lower", 0_i64)
        .parent("upper", 110_i64)
        .default_value(50_i64)
        .build(&mut graph)
        .unwrap();
    let e = NodeBuilder::stochastic("e", Exponential)
        .parent("rate", 1.0)
        .default_value(1.0)
        .build(&mut graph)
        .unwrap();
    let l = NodeBuilder::stochastic("l", Exponential)
        .parent("rate", 1.0)
        .default_value(0.1)
        .build(&mut graph)
        .unwrap();

    for i in 0..copies {
        let density = FnDensity::new("changepoint", &["s", "e", "l"], |value, params| {
            let s = params.int("s")?.max(0) as usize;
            Ok(poisson_logp(&value.slice(0, s), params.real("e")?)
                + poisson_logp(&value.slice(s, value.len()), params.real("l")?))
        });
        NodeBuilder::data(format!("D{i}"), density, &DISASTERS[..])
            .parent("s", s)
            .parent("e", e)
            .parent("l", l)
            .build(&mut graph)
            .unwrap();
    }
    (graph, s, l)
}

fn bench_joint_logp(c: &mut Criterion) {
    let mut group = c.benchmark_group("joint_logp");

    for copies in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::new("update_rate", copies), &copies, |b, &n| {
            let (mut graph, _, l) = changepoint(n);
            let mut toggle = false;
            b.iter(|| {
                toggle = !toggle;
                graph.set_value(l, if toggle { 0.2 } else { 0.1 }).unwrap();
                black_box(graph.joint_logp().unwrap())
            })
        });

        group.bench_with_input(BenchmarkId::new("cached", copies), &copies, |b, &n| {
            let (mut graph, _, _) = changepoint(n);
            graph.joint_logp().unwrap();
            b.iter(|| black_box(graph.joint_logp().unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("move_changepoint", copies), &copies, |b, &n| {
            let (mut graph, s, _) = changepoint(n);
            let mut index = 0_i64;
            b.iter(|| {
                index = (index + 7) % 111;
                graph.set_value(s, index).unwrap();
                black_box(graph.joint_logp().unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_joint_logp);
criterion_main!(benches);
