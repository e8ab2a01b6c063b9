//! Upload Engine Benchmarks
//!
//! Throughput of chunking, staging and committing a file against the
//! in-memory block store, with resume records written to disk.
//!
//! Run with: `cargo bench --bench upload_engine`

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use blocklift_server::storage::MemoryBlockStore;
use blocklift_server::upload::{FileResumeStore, ProgressRegistry, UploadEngine, UploadOptions};

const FILE_SIZE: usize = 16 * 1024 * 1024;

fn setup() -> (TempDir, std::path::PathBuf, UploadEngine) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("source.bin");
    let data: Vec<u8> = (0..FILE_SIZE).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).unwrap();

    let engine = UploadEngine::new(
        Arc::new(MemoryBlockStore::new()),
        Arc::new(FileResumeStore::new(temp_dir.path().join("state"))),
        ProgressRegistry::new(),
    );

    (temp_dir, path, engine)
}

fn bench_chunk_sizes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (_temp_dir, path, engine) = setup();

    let mut group = c.benchmark_group("upload_stream");
    group.throughput(Throughput::Bytes(FILE_SIZE as u64));
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for chunk_size in [256 * 1024, 1024 * 1024, 4 * 1024 * 1024] {
        let options = UploadOptions {
            chunk_size,
            max_retries: 0,
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &options,
            |b, options| {
                b.to_async(&rt).iter(|| async {
                    engine
                        .upload_stream(&path, "bench.bin", *options)
                        .await
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_progress_registry(c: &mut Criterion) {
    let registry = ProgressRegistry::new();
    for i in 0..64 {
        registry.set(&format!("file-{}.bin", i), i as f64);
    }

    let mut group = c.benchmark_group("progress_registry");
    group.bench_function("set", |b| b.iter(|| registry.set("file-7.bin", 42.0)));
    group.bench_function("snapshot_64", |b| b.iter(|| registry.snapshot()));
    group.finish();
}

criterion_group!(benches, bench_chunk_sizes, bench_progress_registry);
criterion_main!(benches);
