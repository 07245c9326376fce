//! S2 — observe a create/modify/delete cycle on a live watcher.

use diskwatcher::catalog::{CatalogConfig, CatalogStore, EventKind};
use diskwatcher::{DirectoryWatcher, DirectoryWatcherConfig, FallbackMountProbe};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn observes_create_modify_delete_cycle() {
	let dir = tempfile::tempdir().unwrap();
	let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();

	let config = DirectoryWatcherConfig {
		volume_id: Some("vol-2".to_string()),
		run_initial_scan: false,
		poll_interval: Duration::from_millis(100),
		..DirectoryWatcherConfig::new(dir.path().to_path_buf())
	};
	let handle = DirectoryWatcher::spawn(store.clone(), config, Arc::new(FallbackMountProbe)).await.unwrap();

	// Let the watch backend attach before generating filesystem activity.
	tokio::time::sleep(Duration::from_millis(300)).await;

	let file_path = dir.path().join("x.txt");
	std::fs::write(&file_path, b"one").unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	std::fs::write(&file_path, b"one-two").unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	std::fs::remove_file(&file_path).unwrap();

	// Poll the catalog rather than a fixed sleep: notify/poll latency varies
	// across hosts and CI sandboxes.
	let mut volumes = Vec::new();
	for _ in 0..50 {
		tokio::time::sleep(Duration::from_millis(100)).await;
		volumes = store.fetch_volume_metadata().await.unwrap();
		if volumes.iter().any(|v| v.deleted_count >= 1) {
			break;
		}
	}
	handle.stop().await;

	let volume = volumes.iter().find(|v| v.volume_id == "vol-2").expect("volume row recorded");
	assert!(volume.created_count >= 1, "expected at least one created event, got {volume:?}");
	assert!(volume.deleted_count >= 1, "expected at least one deleted event, got {volume:?}");

	let events = store.query_events(10).await.unwrap();
	assert!(events.iter().any(|e| e.kind == EventKind::Deleted));
}
