//! Benchmark: bump allocation fast path, pool refills and reconciliation.

use std::collections::HashSet;
use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use megablock::{CollectionType, HeapAllocator, HeapConfig, MegaGroup};

fn fresh_heap() -> HeapAllocator {
    HeapAllocator::new(HeapConfig::default().max_units(1024)).unwrap()
}

fn bench_bump_small(c: &mut Criterion) {
    c.bench_function("bump_1000_small_objects", |b| {
        b.iter_batched(
            fresh_heap,
            |mut heap| {
                for _ in 0..1000 {
                    black_box(heap.allocate(4, false).unwrap());
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_refill_heavy(c: &mut Criterion) {
    c.bench_function("allocate_16mib_in_blocks", |b| {
        b.iter_batched(
            fresh_heap,
            |mut heap| {
                // 4096 block-sized requests force roughly 16 pinned refills.
                for _ in 0..4096 {
                    black_box(heap.allocate_pinned(512).unwrap());
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_major_reconcile(c: &mut Criterion) {
    c.bench_function("major_reconcile_256_groups", |b| {
        b.iter_batched(
            || {
                let mut heap = fresh_heap();
                let mut live = HashSet::new();
                for i in 0..256 {
                    let group = heap.allocate_mega_group(1, i % 3 == 0, 0).unwrap();
                    if i % 2 == 0 {
                        live.insert(group);
                    }
                }
                live.insert(heap.current_pinned());
                (heap, live)
            },
            |(mut heap, live): (HeapAllocator, HashSet<MegaGroup>)| {
                black_box(
                    heap.handle_liveness(&live, &HashSet::new(), CollectionType::Major)
                        .unwrap(),
                );
                heap
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_bump_small,
    bench_refill_heavy,
    bench_major_reconcile
);
criterion_main!(benches);
