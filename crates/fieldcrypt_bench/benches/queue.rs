//! Reconciliation queue benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use fieldcrypt_bench::{aes_host, article};
use fieldcrypt_core::{QueueItem, ReconciliationQueue, StoredQueue};
use fieldcrypt_storage::MemoryStore;
use fieldcrypt_testkit::TestHost;
use std::sync::Arc;
use std::time::Duration;

fn bench_claim_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("stored_queue");

    for count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("drain", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let queue = StoredQueue::new(Arc::new(MemoryStore::new()));
                    for n in 0..count {
                        queue.create_item(&QueueItem::new("article", n as u64)).unwrap();
                    }
                    queue
                },
                |queue| {
                    while let Some(claimed) = queue.claim_item(Duration::from_secs(30)).unwrap() {
                        queue.delete_item(&claimed).unwrap();
                    }
                    black_box(queue);
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_enqueue_file_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_store_queue");
    group.sample_size(10);

    for count in [500usize, 1000, 2000] {
        let items: Vec<QueueItem> = (0..count).map(|n| QueueItem::new("article", n as u64)).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("create_item", count), &items, |b, items| {
            b.iter_batched(
                TestHost::file,
                |host| {
                    for item in items {
                        host.queue.create_item(item).unwrap();
                    }
                    host
                },
                BatchSize::PerIteration,
            );
        });
        group.bench_with_input(BenchmarkId::new("create_items", count), &items, |b, items| {
            b.iter_batched(
                TestHost::file,
                |host| {
                    host.queue.create_items(items).unwrap();
                    host
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_reencrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    group.sample_size(20);

    for count in [10usize, 100] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("decrypt_field", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let host = aes_host();
                    for _ in 0..count {
                        let mut record = article(256, 1);
                        host.save(&mut record);
                    }
                    host.manager
                        .decrypt_field("article", "field_secret", false)
                        .unwrap();
                    host
                },
                |host| {
                    let report = host.run_queue();
                    black_box(report);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_claim_delete, bench_enqueue_file_store, bench_reencrypt);
criterion_main!(benches);
