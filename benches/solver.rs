use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use omr::graph::BipartiteGraph;
use omr::math::modular::{ModT, T};
use omr::math::solver;
use omr::params::RetrievalConfig;

/// Builds a solvable bucket system the way a digest decode would: K
/// pertinent transactions spread over M buckets via the shared graph.
fn bucket_system(
    config: &RetrievalConfig,
    pertinent: usize,
) -> (Vec<Vec<u64>>, Vec<Vec<u64>>) {
    let graph = BipartiteGraph::generate(config);
    let mut rng = ChaCha20Rng::seed_from_u64(17);
    let width = config.payload_slots;

    let indices: Vec<usize> = (0..pertinent).map(|k| k * 31 % config.num_transactions).collect();
    let payloads: Vec<Vec<u64>> = indices
        .iter()
        .map(|_| (0..width).map(|_| rng.gen_range(0..T)).collect())
        .collect();

    let mut lhs = vec![vec![0u64; pertinent]; config.num_buckets];
    let mut rhs = vec![vec![0u64; width]; config.num_buckets];
    for (column, &index) in indices.iter().enumerate() {
        for (bucket, &weight) in graph.buckets[index].iter().zip(&graph.weights[index]) {
            lhs[*bucket][column] = weight;
            for j in 0..width {
                rhs[*bucket][j] = ModT::add(rhs[*bucket][j], ModT::mul(payloads[column][j], weight));
            }
        }
    }
    (lhs, rhs)
}

fn solver_benchmark(c: &mut Criterion) {
    let config = RetrievalConfig::recommended(65536);
    let mut group = c.benchmark_group("solve");
    for pertinent in [1usize, 10, 25, 50] {
        let (lhs, rhs) = bucket_system(&config, pertinent);
        group.bench_with_input(
            BenchmarkId::from_parameter(pertinent),
            &(lhs, rhs),
            |b, (lhs, rhs)| {
                b.iter(|| {
                    solver::solve(lhs.clone(), rhs.clone(), config.payload_slots).unwrap()
                })
            },
        );
    }
    group.finish();
}

fn graph_benchmark(c: &mut Criterion) {
    let config = RetrievalConfig::recommended(65536);
    c.bench_function("graph_generation_65536", |b| {
        b.iter(|| BipartiteGraph::generate(&config))
    });
}

criterion_group!(benches, solver_benchmark, graph_benchmark);
criterion_main!(benches);
