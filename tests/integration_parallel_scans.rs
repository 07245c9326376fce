//! S4 — parallel initial scans across two drives.

use diskwatcher::catalog::{CatalogConfig, CatalogStore, JobKind, JobStatus};
use diskwatcher::{FallbackMountProbe, WatcherSupervisor};
use std::sync::Arc;

#[tokio::test]
async fn parallel_scans_complete_independently() {
	let catalog_dir = tempfile::tempdir().unwrap();
	let store = CatalogStore::open(CatalogConfig::file(catalog_dir.path().join("catalog.db"))).unwrap();

	let d1 = tempfile::tempdir().unwrap();
	let d2 = tempfile::tempdir().unwrap();
	for i in 0..10 {
		std::fs::write(d1.path().join(format!("f{i}.txt")), b"x").unwrap();
		std::fs::write(d2.path().join(format!("f{i}.txt")), b"y").unwrap();
	}

	let supervisor = WatcherSupervisor::new(store.clone(), Arc::new(FallbackMountProbe), Vec::new());
	supervisor.add_directory(d1.path(), None).await.unwrap();
	supervisor.add_directory(d2.path(), None).await.unwrap();

	let progress = supervisor.run_initial_scans(true, Some(2), None).await.unwrap();
	assert_eq!(progress.len(), 2);
	assert!(progress.iter().all(|p| p.files_scanned == 10));

	let jobs = store.fetch_jobs(true, None).await.unwrap();
	let scan_jobs: Vec<_> = jobs.iter().filter(|j| j.kind == JobKind::InitialScan).collect();
	assert_eq!(scan_jobs.len(), 2);
	assert!(scan_jobs.iter().all(|j| j.status == JobStatus::Complete));

	let events = store.query_events(100).await.unwrap();
	assert_eq!(events.len(), 20);

	let volumes = store.fetch_volume_metadata().await.unwrap();
	assert_eq!(volumes.len(), 2);
	assert!(volumes.iter().all(|v| v.event_count == 10));

	supervisor.stop_all().await;
}
