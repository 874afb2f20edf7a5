//! Save and load path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fieldcrypt_bench::{aes_host, article, as_stored};

const PAYLOAD_SIZES: [usize; 3] = [64, 1024, 16 * 1024];

fn bench_encrypt(c: &mut Criterion) {
    let host = aes_host();
    let mut group = c.benchmark_group("encrypt_record");

    for size in PAYLOAD_SIZES {
        let record = article(size, 1);
        group.throughput(Throughput::Bytes((size * 3) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &record, |b, record| {
            b.iter(|| {
                let mut working = record.clone();
                host.processor.encrypt_record(black_box(&mut working)).unwrap();
                black_box(working);
            });
        });
    }

    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let host = aes_host();
    let mut group = c.benchmark_group("decrypt_record");

    for size in PAYLOAD_SIZES {
        let mut record = article(size, 1);
        host.processor.encrypt_record(&mut record).unwrap();
        let stored = as_stored(record);
        group.throughput(Throughput::Bytes((size * 3) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &stored, |b, stored| {
            b.iter(|| {
                let mut working = stored.clone();
                host.processor.decrypt_record(black_box(&mut working)).unwrap();
                black_box(working);
            });
        });
    }

    group.finish();
}

fn bench_multi_value(c: &mut Criterion) {
    let host = aes_host();
    let mut group = c.benchmark_group("encrypt_items");

    for items in [1usize, 10, 100] {
        let record = article(128, items);
        group.throughput(Throughput::Elements(items as u64));
        group.bench_with_input(BenchmarkId::from_parameter(items), &record, |b, record| {
            b.iter(|| {
                let mut working = record.clone();
                host.processor.encrypt_record(black_box(&mut working)).unwrap();
                black_box(working);
            });
        });
    }

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let host = aes_host();
    let record = article(1024, 4);

    c.bench_function("save_then_load", |b| {
        b.iter(|| {
            let mut saved = record.clone();
            host.save(&mut saved);
            let loaded = host.load("article", saved.id.as_ref().unwrap());
            black_box(loaded);
        });
    });
}

criterion_group!(benches, bench_encrypt, bench_decrypt, bench_multi_value, bench_round_trip);
criterion_main!(benches);
