use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use requeue_core::factory;
use requeue_core::{RateLimiter, WorkQueue};
use std::time::Duration;

fn benchmark_work_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue");
    group.measurement_time(Duration::from_secs(10));
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("add_get_done_1000", |b| {
        b.to_async(&rt).iter_batched(
            factory::work_queue::<u64>,
            |queue| async move {
                for item in 0..1000 {
                    queue.add(item);
                }
                while let Some(item) = queue.poll(Duration::ZERO).await.unwrap() {
                    queue.done(&item);
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("add_duplicates_1000", |b| {
        b.iter_batched(
            factory::work_queue::<u64>,
            |queue| {
                for item in 0..1000 {
                    queue.add(item % 10);
                }
                queue.len()
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_rate_limiters(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate_limiters");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();

    let backoff = factory::exponential_backoff::<u64>(
        Duration::from_millis(5),
        Duration::from_secs(1000),
    )
    .unwrap();
    group.bench_function("exponential_when", |b| {
        let mut item = 0u64;
        b.iter(|| {
            item = (item + 1) % 1024;
            backoff.when(&item)
        })
    });

    let controller = factory::controller_rate_limiter::<u64>();
    group.bench_function("controller_when_forget", |b| {
        let mut item = 0u64;
        b.iter(|| {
            item = (item + 1) % 1024;
            let delay = controller.when(&item);
            controller.forget(&item);
            delay
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_work_queue, benchmark_rate_limiters);
criterion_main!(benches);
