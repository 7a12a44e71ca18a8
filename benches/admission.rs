// Admission Benchmarks
//
// Measures the per-job bookkeeping around the external fetch:
// - Entity lock acquire/release, with and without eviction pressure
// - Quota reserve + compensate on the in-memory and SQLite ledgers

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use jobgate::admission::{EntityLockRegistry, LockAttempt, QuotaReservationStore};
use jobgate::store::{EntityProfile, MemoryLedger, SqliteLedger, UsageLedger};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_lock_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("entity_lock");

    for max_tracked in [16usize, 1000] {
        let registry = EntityLockRegistry::new(max_tracked);
        let mut next = 0i64;
        group.bench_with_input(
            BenchmarkId::new("acquire_release", max_tracked),
            &max_tracked,
            |b, _| {
                b.iter(|| {
                    next = (next + 1) % 4096;
                    if let LockAttempt::Acquired(lock) = registry.try_acquire(black_box(next)) {
                        lock.release();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_reserve_compensate(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("quota");

    let memory: Arc<dyn UsageLedger> = Arc::new(MemoryLedger::new());
    let sqlite: Arc<dyn UsageLedger> = Arc::new(rt.block_on(SqliteLedger::in_memory()).unwrap());

    for (name, ledger) in [("memory", memory), ("sqlite", sqlite)] {
        rt.block_on(ledger.upsert_entity(1, &EntityProfile::default(), chrono::Utc::now()))
            .unwrap();
        let quota = QuotaReservationStore::new(ledger);

        group.bench_function(BenchmarkId::new("reserve_compensate", name), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let reservation = quota
                        .reserve(black_box(1), "https://x.com/i/status/1", 3)
                        .await
                        .unwrap();
                    if let Some(record) = reservation.record() {
                        quota.compensate(record.id).await.unwrap();
                    }
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lock_registry, bench_reserve_compensate);
criterion_main!(benches);
