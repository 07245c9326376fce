//! S5 (narrowed) and auto-discovery idempotence.
//!
//! Simulating an actual new host mount arriving mid-test isn't something a
//! sandboxed run can do, so this exercises the auto-discovery loop against
//! mount points that already exist on the test host (`/dev/shm` is a tmpfs
//! mount on every Linux box this runs on) rather than against a freshly
//! attached device.

use diskwatcher::catalog::{CatalogConfig, CatalogStore};
use diskwatcher::{AutoDiscoveryConfig, AutoDiscoveryLoop, FallbackMountProbe, WatcherSupervisor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn shm_mount() -> Option<PathBuf> {
	let path = PathBuf::from("/dev/shm");
	path.is_dir().then(|| std::fs::canonicalize(&path).unwrap_or(path))
}

#[tokio::test]
async fn priming_cycle_attaches_existing_mount_points() {
	let Some(shm) = shm_mount() else { return };
	let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
	let supervisor = Arc::new(WatcherSupervisor::new(store, Arc::new(FallbackMountProbe), Vec::new()));

	let config = AutoDiscoveryConfig { roots: vec![PathBuf::from("/")], scan_new: false, interval: Duration::from_secs(60) };
	let handle = AutoDiscoveryLoop::start(supervisor.clone(), config).await;

	let paths = supervisor.current_paths().await;
	assert!(paths.contains(&shm), "expected {shm:?} among discovered paths, got {paths:?}");

	handle.stop().await;
}

#[tokio::test]
async fn repeated_cycles_over_a_stable_mount_set_are_idempotent() {
	let Some(_shm) = shm_mount() else { return };
	let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
	let supervisor = Arc::new(WatcherSupervisor::new(store, Arc::new(FallbackMountProbe), Vec::new()));

	let config = AutoDiscoveryConfig { roots: vec![PathBuf::from("/")], scan_new: false, interval: Duration::from_millis(100) };
	let handle = AutoDiscoveryLoop::start(supervisor.clone(), config).await;

	let after_first = supervisor.current_paths().await.len();
	tokio::time::sleep(Duration::from_millis(350)).await;
	let after_several_ticks = supervisor.current_paths().await.len();

	assert_eq!(after_first, after_several_ticks, "a stable mount set should not grow or shrink the watcher set across cycles");

	handle.stop().await;
}
