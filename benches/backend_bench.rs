//! Native vs fallback benchmarks, one group per component

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use crewai_accelerate::{
    AcceleratedMemoryStorage, AcceleratedSqliteWrapper, AcceleratedTaskExecutor, Backend,
    Message, MessageCodec, Metadata, PoolConfig, TaskDescriptor,
};
use serde_json::json;
use tempfile::TempDir;

const BACKENDS: [Backend; 2] = [Backend::Native, Backend::Fallback];

fn bench_memory_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_search");

    for backend in BACKENDS {
        let store = AcceleratedMemoryStorage::with_backend(backend);
        for i in 0..2_000 {
            store.save(
                format!("record {} about rust programming and agents {}", i, i % 17),
                Metadata::new(),
            );
        }

        group.bench_with_input(BenchmarkId::from_parameter(backend), &store, |b, store| {
            b.iter(|| black_box(store.search("rust agents", 10)));
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_round_trip");
    let messages: Vec<Message> = (0..100)
        .map(|i| Message::with_timestamp(format!("m{}", i), "alice", "bob", "payload", i))
        .collect();

    for backend in BACKENDS {
        let codec = MessageCodec::with_backend(backend);
        group.bench_with_input(BenchmarkId::from_parameter(backend), &codec, |b, codec| {
            b.iter(|| {
                let encoded: Vec<String> = codec
                    .encode_batch(&messages)
                    .into_iter()
                    .map(|r| r.unwrap())
                    .collect();
                black_box(codec.decode_batch(&encoded));
            });
        });
    }

    group.finish();
}

fn bench_task_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("task_batch");

    for backend in BACKENDS {
        let executor = AcceleratedTaskExecutor::with_backend(backend, 4).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(backend), &executor, |b, executor| {
            b.iter(|| {
                let tasks: Vec<TaskDescriptor> =
                    (0..32).map(|i| TaskDescriptor::new(format!("t{}", i))).collect();
                black_box(executor.execute_concurrent_tasks(tasks));
            });
        });
    }

    group.finish();
}

fn bench_sqlite_memories(c: &mut Criterion) {
    let mut group = c.benchmark_group("sqlite_save_load");
    let dir = TempDir::new().unwrap();

    for backend in BACKENDS {
        let db = AcceleratedSqliteWrapper::with_backend(
            backend,
            dir.path().join(format!("{}.db", backend)),
            PoolConfig::with_pool_size(2),
        )
        .unwrap();
        let metadata = json!({"quality": 0.8});

        group.bench_with_input(BenchmarkId::from_parameter(backend), &db, |b, db| {
            b.iter(|| {
                db.save_memory("bench task", &metadata, "2024-01-01 00:00:00", 0.5)
                    .unwrap();
                black_box(db.load_memories("bench task", 5).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_memory_search,
    bench_codec,
    bench_task_batch,
    bench_sqlite_memories
);
criterion_main!(benches);
