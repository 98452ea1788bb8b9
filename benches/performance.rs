//! Performance benchmarks for the node log.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use taillog::{
    EnvelopeFormat, FileKvConfig, LogService, NodeId, ReaderOptions, Sequence, ServiceConfig,
};
use tempfile::TempDir;

fn create_local(dir: &TempDir) -> LogService {
    LogService::open_local(
        FileKvConfig {
            path: dir.path().join("log"),
            create_if_missing: true,
        },
        ServiceConfig::default(),
    )
    .unwrap()
}

/// Benchmark single appends in memory and on disk
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    let payload = vec![0u8; 256];

    group.bench_function("memory", |b| {
        let service = LogService::in_memory(ServiceConfig::default()).unwrap();
        let node = service.open_node().unwrap();
        b.iter(|| black_box(service.append(&node, None, &payload).unwrap()));
    });

    group.bench_function("file", |b| {
        let dir = TempDir::new().unwrap();
        let service = create_local(&dir);
        let node = service.open_node().unwrap();
        b.iter(|| black_box(service.append(&node, None, &payload).unwrap()));
    });

    group.finish();
}

/// Benchmark full replays of histories of varying length
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for history in [10u64, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("history", history), &history, |b, &n| {
            let service = LogService::in_memory(ServiceConfig {
                record_cache_size: 0,
                ..Default::default()
            })
            .unwrap();
            let node = NodeId::from(1);
            service.open_node_as(node.clone()).unwrap();
            for i in 0..n {
                service.append(&node, None, &i.to_le_bytes()).unwrap();
            }

            b.iter(|| {
                let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
                for _ in 0..n {
                    black_box(stream.next_frame(Some(Duration::from_secs(1))).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark envelope encoding of a 1KB frame
fn bench_envelope(c: &mut Criterion) {
    let service = LogService::in_memory(ServiceConfig::default()).unwrap();
    let node = service.open_node().unwrap();
    service.append(&node, Some("application/octet-stream"), &[7u8; 1024]).unwrap();
    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    let frame = stream.next_frame(Some(Duration::from_secs(1))).unwrap().unwrap();
    assert_eq!(frame.sequence, Sequence(1));

    let mut group = c.benchmark_group("envelope");
    for format in [EnvelopeFormat::Json, EnvelopeFormat::Msgpack] {
        group.bench_with_input(
            BenchmarkId::new("encode", format!("{format:?}")),
            &format,
            |b, &format| b.iter(|| black_box(frame.encode(format).unwrap())),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_replay, bench_envelope);
criterion_main!(benches);
