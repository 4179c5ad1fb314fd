//! Index benchmarks: insert routing, KNN lookup and maintenance sweeps at
//! realistic centroid counts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vecmesh_core::DataPoint;
use vecmesh_node::{CentroidManager, ManagerConfig};

/// Random normalized vectors, reproducible by seed.
fn generate_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut v: Vec<f64> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                v.iter_mut().for_each(|x| *x /= norm);
            }
            v
        })
        .collect()
}

fn manager(split_threshold: usize) -> CentroidManager {
    CentroidManager::new(ManagerConfig {
        split_threshold,
        ..ManagerConfig::default()
    })
    .expect("cosine/cosine config is valid")
}

fn populated_manager(count: usize, dim: usize) -> CentroidManager {
    let mut cm = manager(256);
    for v in generate_vectors(count, dim, 42) {
        let _ = cm.add_data_point(DataPoint::new(v, Vec::new()));
    }
    cm
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager insert");
    group.sample_size(10);

    for size in [1_000, 10_000] {
        let dim = 128;
        let vectors = generate_vectors(size, dim, 42);
        group.bench_with_input(BenchmarkId::from_parameter(size), &vectors, |b, vecs| {
            b.iter(|| {
                let mut cm = manager(256);
                for v in vecs {
                    let _ = cm.add_data_point(DataPoint::new(v.clone(), Vec::new()));
                }
                black_box(cm.len_dp())
            });
        });
    }
    group.finish();
}

fn bench_knn_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager knn lookup");

    let dim = 128;
    let mut cm = populated_manager(10_000, dim);
    let queries = generate_vectors(64, dim, 123);

    for k in [1, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            let mut i = 0;
            b.iter(|| {
                let q = &queries[i % queries.len()];
                i += 1;
                black_box(cm.knn_lookup(q, k, false))
            });
        });
    }
    group.finish();
}

fn bench_maintenance(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager maintenance");
    group.sample_size(10);

    let dim = 64;
    group.bench_function("distribute_internal", |b| {
        b.iter_batched(
            || populated_manager(5_000, dim),
            |mut cm| {
                cm.distribute_internal(500);
                black_box(cm.len_dp())
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.bench_function("mem_trim", |b| {
        b.iter_batched(
            || populated_manager(5_000, dim),
            |mut cm| {
                cm.mem_trim();
                black_box(cm.len_centroids())
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_knn_lookup, bench_maintenance);
criterion_main!(benches);
