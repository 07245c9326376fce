//! S1 — archive an existing tree.

use diskwatcher::catalog::{CatalogConfig, CatalogStore, EventKind, JobKind, JobStatus};
use diskwatcher::{DirectoryWatcher, DirectoryWatcherConfig, FallbackMountProbe, WatcherState};
use std::sync::Arc;

#[tokio::test]
async fn archives_an_existing_tree() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
	std::fs::create_dir(dir.path().join("sub")).unwrap();
	std::fs::write(dir.path().join("sub/b.txt"), b"bye").unwrap();

	let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
	let config = DirectoryWatcherConfig {
		volume_id: Some("vol-1".to_string()),
		run_initial_scan: true,
		..DirectoryWatcherConfig::new(dir.path().to_path_buf())
	};

	let handle = DirectoryWatcher::spawn(store.clone(), config, Arc::new(FallbackMountProbe)).await.unwrap();

	// Give the scan task time to run, then stop before the live-watch phase
	// keeps this test from depending on notify's event latency.
	for _ in 0..200 {
		if !matches!(handle.state().await, WatcherState::Created | WatcherState::Scanning) {
			break;
		}
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	}
	handle.stop().await;

	let events = store.query_events(10).await.unwrap();
	assert_eq!(events.len(), 2);
	assert!(events.iter().all(|e| e.kind == EventKind::Existing));

	let volumes = store.fetch_volume_metadata().await.unwrap();
	assert_eq!(volumes.len(), 1);
	assert_eq!(volumes[0].volume_id, "vol-1");
	assert_eq!(volumes[0].event_count, 2);

	let files = store.summarize_files(10).await.unwrap();
	assert_eq!(files.len(), 2);

	let jobs = store.fetch_jobs(true, None).await.unwrap();
	let scan_job = jobs.iter().find(|j| j.kind == JobKind::InitialScan).expect("scan job recorded");
	assert_eq!(scan_job.status, JobStatus::Complete);
	let progress = scan_job.progress.as_ref().expect("scan job records progress");
	assert_eq!(progress.get("files_scanned").and_then(|v| v.as_u64()), Some(2));
	assert_eq!(progress.get("directories_seen").and_then(|v| v.as_u64()), Some(2));
}
