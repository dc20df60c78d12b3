use std::hint::black_box;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;

use sluice::FlowRule;
use sluice::Sluice;

fn governed_runtime() -> Sluice {
    let sluice = Sluice::new();
    // High enough that the bench measures the pipeline, not rejections.
    sluice
        .load_flow_rules(vec![FlowRule {
            resource: "bench".into(),
            count: 1_000_000_000.0,
            ..FlowRule::default()
        }])
        .unwrap();
    sluice
}

fn bench_entry_exit(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry-exit");

    let bare = Sluice::new();
    group.bench_function("no-rules", |b| {
        b.iter(|| {
            if let Ok(entry) = black_box(&bare).entry("bench") {
                entry.exit();
            }
        })
    });

    let governed = governed_runtime();
    group.bench_function("flow-rule", |b| {
        b.iter(|| {
            if let Ok(entry) = black_box(&governed).entry("bench") {
                entry.exit();
            }
        })
    });

    group.finish();
}

fn bench_parallel_entry(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry-exit-parallel");
    group.measurement_time(Duration::from_secs(8));

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let sluice = governed_runtime();
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let sluice = sluice.clone();
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait();
                            for _ in 0..iters_per_thread {
                                if let Ok(entry) = sluice.entry("bench") {
                                    entry.exit();
                                }
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_entry_exit, bench_parallel_entry);
criterion_main!(benches);
