//! Benchmarks for sweep data processing
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vnasaver_rs::export::Touchstone;
use vnasaver_rs::store::{compute_summary, correct_attenuation, MeasurementStore};
use vnasaver_rs::types::Datapoint;

fn sweep(points: usize) -> Vec<Datapoint> {
    (0..points)
        .map(|i| {
            let phase = i as f64 / points as f64 * std::f64::consts::TAU;
            Datapoint::new(1_000_000 + i as u64 * 1000, 0.5 * phase.cos(), 0.5 * phase.sin())
        })
        .collect()
}

fn bench_store_save_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");

    for size in [101, 1010, 10_100].iter() {
        let data = sweep(*size);
        let store = MeasurementStore::new(20.0, "bench");

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("save", size), &data, |b, data| {
            b.iter(|| store.save(black_box(data.clone()), black_box(data.clone()), None));
        });
        group.bench_with_input(BenchmarkId::new("snapshot", size), &store, |b, store| {
            b.iter(|| black_box(store.snapshot()));
        });
    }

    group.finish();
}

fn bench_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("summary");

    for size in [101, 1010, 10_100].iter() {
        let data = sweep(*size);
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("compute_summary", size), &data, |b, data| {
            b.iter(|| black_box(compute_summary(data, data)));
        });
        group.bench_with_input(BenchmarkId::new("correct_attenuation", size), &data, |b, data| {
            b.iter(|| black_box(correct_attenuation(data.clone(), 20.0)));
        });
    }

    group.finish();
}

fn bench_touchstone(c: &mut Criterion) {
    let mut group = c.benchmark_group("touchstone");

    for size in [101, 1010].iter() {
        let file = Touchstone::two_port(sweep(*size), sweep(*size));
        let text = file.format();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("format", size), &file, |b, file| {
            b.iter(|| black_box(file.format()));
        });
        group.bench_with_input(BenchmarkId::new("parse", size), &text, |b, text| {
            b.iter(|| black_box(Touchstone::parse(text)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_store_save_snapshot,
    bench_summary,
    bench_touchstone
);
criterion_main!(benches);
