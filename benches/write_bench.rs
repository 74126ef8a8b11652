// Write performance benchmarks for Velocity

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use tempfile::TempDir;
use velocity::{row, CompressionType, DataType, RowBatch, Schema, Value, VelocityBlock, VelocityOptions};

fn schema() -> Schema {
    Schema::new()
        .with_column("Id", DataType::Long)
        .with_column("Symbol", DataType::String)
        .with_column("Price", DataType::Float)
        .with_column("Volume", DataType::Integer)
}

fn trade(id: i64) -> Vec<Value> {
    row![id, format!("SYM{:03}", id % 500), 100.0 + (id % 97) as f64 * 0.25, (id % 1000) as i32]
}

fn new_store(dir: &TempDir, options: VelocityOptions) -> VelocityBlock {
    VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap()
}

fn benchmark_sequential_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_append");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let store = new_store(&temp_dir, VelocityOptions::default());
                for id in 0..size as i64 {
                    store.add_row(trade(id)).unwrap();
                }
                black_box(&store);
            });
        });
    }

    group.finish();
}

fn benchmark_keyed_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("keyed_append");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let store = new_store(&temp_dir, VelocityOptions::default().primary_key("Id"));
                let mut rng = rand::rng();
                for _ in 0..size {
                    let id: i64 = rng.random();
                    // Random keys may collide; a rejected duplicate is part of the workload.
                    let _ = store.add_row(trade(id));
                }
                black_box(&store);
            });
        });
    }

    group.finish();
}

fn benchmark_batch_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_append");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let rows = (0..batch_size as i64).map(trade).collect();
                let batch = RowBatch::from_rows(schema(), rows).unwrap();
                b.iter(|| {
                    let temp_dir = TempDir::new().unwrap();
                    let store = new_store(&temp_dir, VelocityOptions::default());
                    store.append_batch(&batch).unwrap();
                    black_box(&store);
                });
            },
        );
    }

    group.finish();
}

fn benchmark_update_by_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_by_key");

    group.throughput(Throughput::Elements(1000));
    group.bench_function("update_1000", |b| {
        // Setup store once for all iterations
        let temp_dir = TempDir::new().unwrap();
        let options = VelocityOptions::default().primary_key("Id").auto_compaction(false);
        let store = new_store(&temp_dir, options);
        store.append_rows((0..1000).map(trade).collect()).unwrap();
        store.flush().unwrap();

        b.iter(|| {
            for id in 0..1000 {
                let mut row = trade(id);
                row[2] = Value::Float(42.0);
                store.update_row_by_key(id, row).unwrap();
            }
            black_box(&store);
        });
    });

    group.finish();
}

fn benchmark_flush_with_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_with_compression");
    let rows: Vec<Vec<Value>> = (0..5000).map(trade).collect();

    let mut codecs = vec![("no_compression", CompressionType::None)];
    #[cfg(feature = "snappy")]
    codecs.push(("snappy_compression", CompressionType::Snappy));
    #[cfg(feature = "lz4-compression")]
    codecs.push(("lz4_compression", CompressionType::Lz4));

    for (name, codec) in codecs {
        group.bench_function(name, |b| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let options = VelocityOptions::default().compression(codec).auto_compression(false);
                let store = new_store(&temp_dir, options);
                store.append_rows(rows.clone()).unwrap();
                store.flush().unwrap();
                black_box(&store);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_append,
    benchmark_keyed_append,
    benchmark_batch_append,
    benchmark_update_by_key,
    benchmark_flush_with_compression
);
criterion_main!(benches);
