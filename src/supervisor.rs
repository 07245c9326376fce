//! Watcher Supervisor: owns the live set of Directory Watchers against one
//! catalog (spec §4.5).
//!
//! Grounded on `examples/original_source/src/diskwatcher/core/manager.py`'s
//! `DiskWatcherManager` (add_directory/start_all/stop_all/status), scaled
//! up to the richer operation set spec §4.5 requires — per-directory
//! serial or worker-pool initial scans, job-status snapshots instead of a
//! bare liveness flag, and explicit removal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::CatalogStore;
use crate::error::{DiskWatcherError, Result};
use crate::mount_probe::MountProbe;
use crate::watcher::{DirectoryWatcher, DirectoryWatcherConfig, DirectoryWatcherHandle, ScanProgress};

/// Per-watcher status snapshot (spec §4.5 `Status`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct WatcherStatus {
	pub path: String,
	pub volume_id: String,
	pub alive: bool,
	pub state: String,
}

struct TrackedWatcher {
	handle: DirectoryWatcherHandle,
	resolved_path: PathBuf,
}

/// The watcher set, guarded by a single mutex (spec §5 Shared-resource
/// policy: "the watcher-set is guarded by a mutex").
pub struct WatcherSupervisor {
	store: CatalogStore,
	mount_probe: Arc<dyn MountProbe>,
	watchers: Mutex<HashMap<PathBuf, TrackedWatcher>>,
	excludes: Vec<String>,
	poll_interval: Duration,
}

impl WatcherSupervisor {
	pub fn new(store: CatalogStore, mount_probe: Arc<dyn MountProbe>, excludes: Vec<String>) -> Self {
		Self { store, mount_probe, watchers: Mutex::new(HashMap::new()), excludes, poll_interval: crate::watcher::DEFAULT_POLL_INTERVAL }
	}

	/// Override the fallback watch backend's polling interval (spec §4.8
	/// `run.polling_interval`), applied to every watcher this supervisor
	/// spawns from here on.
	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	pub fn store(&self) -> &CatalogStore {
		&self.store
	}

	fn resolve(path: &Path) -> PathBuf {
		std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
	}

	/// Resolve, dedupe, probe mount identity if needed, and register a new
	/// watcher without starting its live loop (spec §4.5 `AddDirectory`).
	pub async fn add_directory(&self, path: &Path, volume_id: Option<String>) -> Result<PathBuf> {
		let resolved = Self::resolve(path);
		let mut watchers = self.watchers.lock().await;
		if watchers.contains_key(&resolved) {
			return Ok(resolved);
		}

		let config = DirectoryWatcherConfig {
			path: resolved.clone(),
			volume_id,
			excludes: self.excludes.clone(),
			run_initial_scan: false,
			poll_interval: self.poll_interval,
			..DirectoryWatcherConfig::new(resolved.clone())
		};
		let handle = DirectoryWatcher::spawn(self.store.clone(), config, self.mount_probe.clone()).await?;
		let handle_path = handle.resolved_path.clone();
		watchers.insert(resolved.clone(), TrackedWatcher { handle, resolved_path: handle_path });
		info!("registered watcher for {resolved:?}");
		Ok(resolved)
	}

	/// Stop and deregister the watcher at `path` (spec §4.5 `RemoveDirectory`).
	pub async fn remove_directory(&self, path: &Path) -> Result<bool> {
		let resolved = Self::resolve(path);
		let mut watchers = self.watchers.lock().await;
		match watchers.remove(&resolved) {
			Some(tracked) => {
				tracked.handle.stop().await;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	/// Start live watching for every registered directory that doesn't
	/// already have one running (spec §4.5 `StartAll`). Directories added
	/// via `add_directory` are created with `run_initial_scan = false`;
	/// this respawns them with live watching enabled.
	pub async fn start_all(&self) -> Result<()> {
		let resolved_paths: Vec<PathBuf> = self.watchers.lock().await.keys().cloned().collect();
		for path in resolved_paths {
			self.restart_with_live_watch(&path).await?;
		}
		Ok(())
	}

	async fn restart_with_live_watch(&self, path: &Path) -> Result<()> {
		let mut watchers = self.watchers.lock().await;
		let Some(tracked) = watchers.remove(path) else { return Ok(()) };
		let volume_id = tracked.handle.volume_id.clone();
		tracked.handle.stop().await;

		let config = DirectoryWatcherConfig {
			path: path.to_path_buf(),
			volume_id: Some(volume_id),
			excludes: self.excludes.clone(),
			run_initial_scan: false,
			poll_interval: self.poll_interval,
			..DirectoryWatcherConfig::new(path.to_path_buf())
		};
		let handle = DirectoryWatcher::spawn(self.store.clone(), config, self.mount_probe.clone()).await?;
		let handle_path = handle.resolved_path.clone();
		watchers.insert(path.to_path_buf(), TrackedWatcher { handle, resolved_path: handle_path });
		Ok(())
	}

	/// Run initial scans for `subset` (or every registered watcher),
	/// serially or via a worker pool (spec §4.5 `RunInitialScans`).
	pub async fn run_initial_scans(&self, parallel: bool, max_workers: Option<usize>, subset: Option<&[PathBuf]>) -> Result<Vec<ScanProgress>> {
		let targets: Vec<PathBuf> = {
			let watchers = self.watchers.lock().await;
			match subset {
				Some(paths) => paths.iter().map(|p| Self::resolve(p)).filter(|p| watchers.contains_key(p)).collect(),
				None => watchers.keys().cloned().collect(),
			}
		};

		if !parallel || self.store.database_path().is_none() {
			if parallel {
				warn!("in-memory catalog cannot be shared across scan workers, degrading RunInitialScans to serial mode");
			}
			return self.run_scans_serial(&targets).await;
		}

		self.run_scans_parallel(&targets, max_workers).await
	}

	async fn run_scans_serial(&self, targets: &[PathBuf]) -> Result<Vec<ScanProgress>> {
		let mut results = Vec::with_capacity(targets.len());
		for path in targets {
			results.push(self.scan_one(path).await?);
		}
		Ok(results)
	}

	async fn run_scans_parallel(&self, targets: &[PathBuf], max_workers: Option<usize>) -> Result<Vec<ScanProgress>> {
		let worker_count = max_workers.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)).max(1).min(targets.len().max(1));
		let semaphore = Arc::new(tokio::sync::Semaphore::new(worker_count));
		let mut tasks = Vec::with_capacity(targets.len());

		for path in targets.iter().cloned() {
			let semaphore = semaphore.clone();
			let store = self
				.store
				.reopen()
				.unwrap_or_else(|_| self.store.clone());
			let mount_probe = self.mount_probe.clone();
			let excludes = self.excludes.clone();
			tasks.push(tokio::spawn(async move {
				let _permit = semaphore.acquire_owned().await;
				scan_one_with(&store, &mount_probe, &excludes, &path).await
			}));
		}

		let mut results = Vec::with_capacity(tasks.len());
		for task in tasks {
			match task.await {
				Ok(Ok(progress)) => results.push(progress),
				Ok(Err(e)) => warn!("parallel initial scan failed: {e}"),
				Err(e) => warn!("parallel scan worker panicked: {e}"),
			}
		}
		Ok(results)
	}

	async fn scan_one(&self, path: &Path) -> Result<ScanProgress> {
		scan_one_with(&self.store, &self.mount_probe, &self.excludes, path).await
	}

	/// Snapshot of each watcher's resolved path, volume id, liveness, and
	/// state (spec §4.5 `Status`).
	pub async fn status(&self) -> Vec<WatcherStatus> {
		let watchers = self.watchers.lock().await;
		let mut out = Vec::with_capacity(watchers.len());
		for tracked in watchers.values() {
			let state = tracked.handle.state().await;
			out.push(WatcherStatus {
				path: tracked.resolved_path.to_string_lossy().into_owned(),
				volume_id: tracked.handle.volume_id.clone(),
				alive: !matches!(state, crate::watcher::WatcherState::Stopped | crate::watcher::WatcherState::Failed),
				state: format!("{state:?}").to_lowercase(),
			});
		}
		out
	}

	/// Stop auto-discovery (caller's responsibility), then stop every
	/// watcher and terminate its job (spec §4.5 `StopAll`).
	pub async fn stop_all(&self) {
		let mut watchers = self.watchers.lock().await;
		for (_, tracked) in watchers.drain() {
			tracked.handle.stop().await;
		}
	}

	/// Mark any non-terminal job abandoned by a dead or foreign-host owner
	/// as `stale` (spec §4.3 `CleanupStaleJobs`), called at startup.
	pub async fn cleanup_stale_jobs(&self) -> Result<usize> {
		let this_host = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
		self.store
			.cleanup_stale_jobs(&this_host, |pid| pid.parse::<u32>().map(process_is_alive).unwrap_or(false))
			.await
	}

	pub async fn current_paths(&self) -> Vec<PathBuf> {
		self.watchers.lock().await.keys().cloned().collect()
	}
}

async fn scan_one_with(store: &CatalogStore, mount_probe: &Arc<dyn MountProbe>, excludes: &[String], path: &Path) -> Result<ScanProgress> {
	let started_at = chrono::Utc::now();
	let config = DirectoryWatcherConfig { path: path.to_path_buf(), volume_id: None, excludes: excludes.to_vec(), run_initial_scan: true, ..DirectoryWatcherConfig::new(path.to_path_buf()) };
	let handle = DirectoryWatcher::spawn(store.clone(), config, mount_probe.clone()).await?;
	let outcome = tokio::time::timeout(std::time::Duration::from_secs(3600), async {
		loop {
			match handle.state().await {
				crate::watcher::WatcherState::Scanning | crate::watcher::WatcherState::Created => {
					tokio::time::sleep(std::time::Duration::from_millis(50)).await;
				}
				_ => break,
			}
		}
	})
	.await;
	if outcome.is_err() {
		return Err(DiskWatcherError::scan(path.to_string_lossy(), "scan did not complete within the timeout"));
	}
	handle.stop().await;

	let path_str = path.to_string_lossy().into_owned();
	let jobs = store.fetch_jobs(true, None).await?;
	let progress = jobs
		.into_iter()
		.filter(|j| j.kind == crate::catalog::JobKind::InitialScan && j.path.as_deref() == Some(path_str.as_str()) && j.started_at >= started_at)
		.max_by_key(|j| j.started_at)
		.and_then(|j| j.progress)
		.and_then(|v| serde_json::from_value(v).ok())
		.unwrap_or_default();
	Ok(progress)
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
	nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
	true
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::CatalogConfig;
	use crate::mount_probe::FallbackMountProbe;

	#[tokio::test]
	async fn add_directory_dedupes_by_resolved_path() {
		let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
		let supervisor = WatcherSupervisor::new(store, Arc::new(FallbackMountProbe), Vec::new());
		let dir = tempfile::tempdir().unwrap();

		let first = supervisor.add_directory(dir.path(), None).await.unwrap();
		let second = supervisor.add_directory(dir.path(), None).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(supervisor.current_paths().await.len(), 1);
	}

	#[tokio::test]
	async fn remove_directory_reports_whether_anything_was_removed() {
		let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
		let supervisor = WatcherSupervisor::new(store, Arc::new(FallbackMountProbe), Vec::new());
		let dir = tempfile::tempdir().unwrap();

		assert!(!supervisor.remove_directory(dir.path()).await.unwrap());
		supervisor.add_directory(dir.path(), None).await.unwrap();
		assert!(supervisor.remove_directory(dir.path()).await.unwrap());
	}
}
