//! Host-side histogram accumulation throughput.
//!
//! Measures the consumer hot path: folding bit-packed local histogram rows
//! into class counters, and adding rotation records for every candidate pair.
//!
//! Run with: cargo bench --bench histogram_accumulation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;
use rand::rngs::StdRng;
use rforest_offload::tree::histogram::{RecordAccumulator, ScalarAccumulator, SimdAccumulator};
use rforest_offload::tree::split::regression::best_rotation_split;
use rforest_offload::ROTATION_RECORD_LEN;

const SAMPLES: usize = 1024;

fn random_rows(pairs: usize, seed: u64) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(pairs > 0, "need at least one candidate pair");
    let mut rng = StdRng::seed_from_u64(seed);
    let row_bytes = pairs.div_ceil(8);
    Ok((0..SAMPLES * row_bytes).map(|_| rng.gen()).collect())
}

fn bench_add_bits(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate/bits");
    let accumulators: [(&str, Box<dyn RecordAccumulator>); 2] = [
        ("scalar", Box::new(ScalarAccumulator)),
        ("simd", Box::new(SimdAccumulator::default())),
    ];

    for pairs in [256usize, 2048] {
        let rows = random_rows(pairs, 17).expect("rows");
        let row_bytes = pairs.div_ceil(8);
        group.throughput(Throughput::Elements((SAMPLES * pairs) as u64));
        for (name, accumulator) in &accumulators {
            group.bench_with_input(BenchmarkId::new(*name, pairs), &pairs, |b, &pairs| {
                let mut counts = vec![0u32; pairs];
                b.iter(|| {
                    for row in rows.chunks(row_bytes) {
                        accumulator.add_bits(&mut counts, black_box(row));
                    }
                    black_box(&counts);
                });
            });
        }
    }
    group.finish();
}

fn bench_add_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulate/rotation_records");
    let mut rng = StdRng::seed_from_u64(5);
    let record: Vec<f64> = (0..ROTATION_RECORD_LEN).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let accumulators: [(&str, Box<dyn RecordAccumulator>); 2] = [
        ("scalar", Box::new(ScalarAccumulator)),
        ("simd", Box::new(SimdAccumulator::default())),
    ];

    let pairs = 512;
    group.throughput(Throughput::Elements(pairs as u64));
    for (name, accumulator) in &accumulators {
        group.bench_function(*name, |b| {
            let mut slot = vec![0.0f64; 2 * pairs * ROTATION_RECORD_LEN];
            b.iter(|| {
                for chunk in slot.chunks_mut(ROTATION_RECORD_LEN).step_by(2) {
                    accumulator.add_record(chunk, black_box(&record));
                }
            });
        });
    }
    group.finish();
}

fn bench_rotation_split(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(9);
    let pairs = 256;
    let slot: Vec<f64> = (0..2 * pairs * ROTATION_RECORD_LEN)
        .map(|i| {
            if i % ROTATION_RECORD_LEN == ROTATION_RECORD_LEN - 1 {
                rng.gen_range(1.0..50.0)
            } else {
                rng.gen_range(-10.0..10.0)
            }
        })
        .collect();
    c.bench_function("split/best_rotation_256_pairs", |b| {
        b.iter(|| black_box(best_rotation_split(black_box(&slot), pairs)));
    });
}

criterion_group!(benches, bench_add_bits, bench_add_records, bench_rotation_split);
criterion_main!(benches);
