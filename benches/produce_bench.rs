//! Append and read throughput of the storage engine.

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use tempfile::TempDir;

use gazette::storage::Topic;

fn bench_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let dir = TempDir::new().expect("temp dir");
    let topic = rt
        .block_on(Topic::open("bench", dir.path().join("bench"), true))
        .expect("open topic");

    let mut group = c.benchmark_group("append");
    for payload_size in [128usize, 1024, 16 * 1024] {
        let payload = Bytes::from(vec![0x5a; payload_size]);
        group.throughput(Throughput::Bytes(payload_size as u64));
        group.bench_function(format!("{payload_size}B"), |b| {
            b.to_async(&rt).iter(|| {
                let payload = payload.clone();
                let topic = &topic;
                async move {
                    topic.append(payload).await.expect("append");
                }
            })
        });
    }
    group.finish();
}

fn bench_read_range(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let dir = TempDir::new().expect("temp dir");
    let topic = rt
        .block_on(Topic::open("bench-read", dir.path().join("bench-read"), true))
        .expect("open topic");

    const MESSAGES: u64 = 1000;
    rt.block_on(async {
        let payload = Bytes::from(vec![0x5a; 1024]);
        for _ in 0..MESSAGES {
            topic.append(payload.clone()).await.expect("append");
        }
    });

    let mut group = c.benchmark_group("read_range");
    group.throughput(Throughput::Elements(100));
    group.bench_function("100x1KiB", |b| {
        b.to_async(&rt).iter(|| {
            let topic = &topic;
            async move {
                let messages = topic.read_range(450, 100).await.expect("read");
                assert_eq!(messages.len(), 100);
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_append, bench_read_range);
criterion_main!(benches);
