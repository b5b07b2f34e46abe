//! Benchmarks for the interaction kernel and prediction.
//!
//! Run with: cargo bench -p fast_features

use ahash::AHashSet;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fast_features::{
    generate_interactions, inline_predict, DenseParameters, ExamplePredict, InteractionCache,
    WeightStore,
};

/// Namespaces `a`, `b`, `c`, `d` with `per_ns` features each.
fn example(per_ns: usize) -> ExamplePredict {
    let mut ec = ExamplePredict::new(0);
    for ns in [b'a', b'b', b'c', b'd'] {
        let fs = ec.feature_group(ns);
        for i in 0..per_ns {
            fs.add_feature_raw((ns as u64) << 20 | i as u64, 1.0 + (i % 3) as f32);
        }
    }
    ec
}

fn terms(list: &[&str]) -> Vec<Vec<u8>> {
    list.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn bench_kernel(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_interactions");
    let ec = example(32);
    let cases = [
        ("pairs", terms(&["ab", "cd"])),
        ("self_pairs", terms(&["aa"])),
        ("cubic", terms(&["abc"])),
        ("generic", terms(&["abcd"])),
    ];
    for (name, interactions) in &cases {
        let mut cache = InteractionCache::new();
        let mut probe = 0usize;
        let count = generate_interactions(interactions, false, &ec, 18, &mut |_: f32, _: u64| probe += 1, &mut cache);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), interactions, |b, interactions| {
            b.iter(|| {
                let mut acc = 0u64;
                generate_interactions(
                    black_box(interactions),
                    false,
                    black_box(&ec),
                    18,
                    &mut |v: f32, i: u64| acc = acc.wrapping_add(i ^ v.to_bits() as u64),
                    &mut cache,
                );
                acc
            })
        });
    }
    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline_predict");
    let weights = DenseParameters::new(18, 0, 0);
    for i in 0..weights.raw_length() {
        weights.set(i, (i % 7) as f32 * 0.01);
    }
    let interactions = terms(&["ab", "cd", "abc"]);
    let ignore = AHashSet::new();
    for per_ns in [8usize, 32] {
        let ec = example(per_ns);
        let mut cache = InteractionCache::new();
        group.bench_with_input(BenchmarkId::from_parameter(per_ns), &ec, |b, ec| {
            b.iter(|| inline_predict(&weights, &ignore, &interactions, false, black_box(ec), &mut cache, 0.0))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_kernel, bench_predict);
criterion_main!(benches);
