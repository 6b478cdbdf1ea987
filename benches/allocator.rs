//! Page allocator benchmarks
//!
//! Measures the cost of the allocation critical section:
//!
//! - `request_page` sweeping a fresh device
//! - request/reclaim churn on a nearly full device (long probes)
//! - contended requests from several threads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use nvmstore::device::{Device, Geometry};

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_sweep");

    for pages in [1024u32, 16384].iter() {
        group.throughput(Throughput::Elements(*pages as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pages), pages, |b, &pages| {
            b.iter_with_setup(
                || Device::emulated("bench", Geometry::new(4, pages / 256, 64)).unwrap(),
                |dev| {
                    for _ in 0..pages {
                        black_box(dev.request_page().unwrap());
                    }
                    dev
                },
            );
        });
    }

    group.finish();
}

fn bench_churn_near_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_churn");
    let geometry = Geometry::new(4, 16, 64);
    let total = geometry.total_pages();

    group.bench_function("reclaim_then_request", |b| {
        let dev = Device::emulated("bench", geometry.clone()).unwrap();
        let pages: Vec<_> = (0..total).map(|_| dev.request_page().unwrap()).collect();
        let mut i = 0usize;

        b.iter(|| {
            let victim = pages[i % pages.len()];
            dev.reclaim_page(victim).unwrap();
            black_box(dev.request_page().unwrap());
            i = i.wrapping_add(97);
        });
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator_contended");

    for threads in [2usize, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            threads,
            |b, &threads| {
                b.iter_with_setup(
                    || Arc::new(Device::emulated("bench", Geometry::new(8, 32, 64)).unwrap()),
                    |dev| {
                        let per_thread = dev.geometry().total_pages() as usize / threads;
                        let handles: Vec<_> = (0..threads)
                            .map(|_| {
                                let dev = Arc::clone(&dev);
                                thread::spawn(move || {
                                    for _ in 0..per_thread {
                                        black_box(dev.request_page().unwrap());
                                    }
                                })
                            })
                            .collect();
                        for h in handles {
                            h.join().unwrap();
                        }
                    },
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_sweep, bench_churn_near_full, bench_contended);
criterion_main!(benches);
