//! Catalog write/read baseline benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use diskwatcher::catalog::{CatalogConfig, CatalogStore, EventKind};
use tempfile::TempDir;
use tokio::runtime::Runtime;

fn bench_append_event_single(c: &mut Criterion) {
	let rt = Runtime::new().unwrap();

	c.bench_function("append_event_single", |b| {
		b.iter(|| {
			rt.block_on(async {
				let temp_dir = TempDir::new().expect("failed to create temp dir");
				let store = CatalogStore::open(CatalogConfig::file(temp_dir.path().join("bench.db"))).unwrap();

				store
					.append_event(EventKind::Created, "/data/a.txt", "/data", "vol-1", None, None, None)
					.await
					.unwrap();
			})
		})
	});
}

fn bench_append_event_batch(c: &mut Criterion) {
	let rt = Runtime::new().unwrap();
	let mut group = c.benchmark_group("append_event_batch");

	for batch_size in [10, 100, 1000].iter() {
		group.bench_with_input(BenchmarkId::new("events", batch_size), batch_size, |b, &batch_size| {
			b.iter(|| {
				rt.block_on(async {
					let temp_dir = TempDir::new().expect("failed to create temp dir");
					let store = CatalogStore::open(CatalogConfig::file(temp_dir.path().join("batch.db"))).unwrap();

					for i in 0..batch_size {
						store
							.append_event(EventKind::Created, format!("/data/path_{i}.txt"), "/data", "vol-1", None, None, None)
							.await
							.unwrap();
					}
				})
			})
		});
	}
	group.finish();
}

fn bench_summarize_by_volume(c: &mut Criterion) {
	let rt = Runtime::new().unwrap();

	c.bench_function("summarize_by_volume", |b| {
		b.iter(|| {
			rt.block_on(async {
				let temp_dir = TempDir::new().expect("failed to create temp dir");
				let store = CatalogStore::open(CatalogConfig::file(temp_dir.path().join("summary.db"))).unwrap();

				for i in 0..100 {
					store
						.append_event(EventKind::Created, format!("/data/setup_{i}.txt"), "/data", "vol-1", None, None, None)
						.await
						.unwrap();
				}

				let summary = store.summarize_by_volume().await.unwrap();
				black_box(summary);
			})
		})
	});
}

criterion_group!(benches, bench_append_event_single, bench_append_event_batch, bench_summarize_by_volume);
criterion_main!(benches);
