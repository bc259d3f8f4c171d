//! Benchmarks for the commit path.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use streamlets::commit::{CommitBatch, CommitLog, Committer};
use streamlets::config::CommitterSettings;
use streamlets::core::{Offset, PartitionId};
use streamlets::log::InMemoryLog;

fn offsets(partitions: u32, per_partition: u64) -> Vec<Offset> {
    (0..partitions)
        .flat_map(|p| (1..=per_partition).map(move |pos| Offset::new(PartitionId::new("bench", p), pos)))
        .collect()
}

fn batch_benchmark(c: &mut Criterion) {
    let input = offsets(4, 1_000);
    c.bench_function("commit_batch_record_4x1000", |b| {
        b.iter_batched(
            CommitBatch::new,
            |mut batch| {
                for offset in &input {
                    black_box(batch.record(offset));
                }
                batch
            },
            BatchSize::SmallInput,
        );
    });
}

fn committer_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let input = offsets(1, 5_000);

    c.bench_function("committer_record_5000_batch_500", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let log = InMemoryLog::new();
                log.create_topic::<u64>("bench", 1).unwrap();
                let commit_log: Arc<dyn CommitLog> = Arc::new(log.commit_log("bench-group"));
                let committer = Committer::new(
                    "bench",
                    CommitterSettings::new().with_max_batch_size(500),
                    commit_log,
                );
                for offset in &input {
                    committer.record(offset.clone()).await.unwrap();
                }
                committer.flush().await.unwrap();
                black_box(committer.stats())
            })
        });
    });
}

criterion_group!(benches, batch_benchmark, committer_benchmark);
criterion_main!(benches);
