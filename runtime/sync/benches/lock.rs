use criterion::{criterion_group, criterion_main, Criterion};
use keel_sync::{critical, Lock, WAIT_FOREVER};

fn bench_lock(c: &mut Criterion) {
    let lock = Lock::new(());

    c.bench_function("lock_acquire_release", |b| {
        b.iter(|| {
            lock.acquire(WAIT_FOREVER).ok();
            lock.release();
        })
    });

    c.bench_function("lock_scoped", |b| {
        b.iter(|| {
            let _guard = lock.scoped();
        })
    });

    c.bench_function("critical_section_enter_exit", |b| {
        b.iter(|| critical::exit(critical::enter()))
    });
}

criterion_group!(benches, bench_lock);
criterion_main!(benches);
