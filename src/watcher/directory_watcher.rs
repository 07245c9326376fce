//! One directory's watcher task: scan, then live-watch, under a state
//! machine (spec §4.4 State).
//!
//! Grounded on the teacher's `watcher::start`/`run_watcher` shape (a
//! `tokio::spawn`'d task driven by `tokio::select!` over a stop signal and
//! an inbound event channel, bridging the synchronous `notify` callback
//! into async via a `spawn_blocking` pump thread), re-pointed at the
//! catalog instead of the redb filesystem cache and generalized with the
//! scanning/watching state machine spec §4.4 requires.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glob::Pattern;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogStore, EventKind, JobKind, MountMetadata};
use crate::error::Result;
use crate::jobs::JobHandle;
use crate::mount_probe::MountProbe;

use super::backend::{BackendKind, WatcherBackend};
use super::scan::{compile_excludes, run_initial_scan, ScanOutcome, ScanStatus};
use super::{DEFAULT_POLL_INTERVAL, MOUNT_REPROBE_INITIAL, MOUNT_REPROBE_MAX, WATCHER_HEARTBEAT_INTERVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
	Created,
	Scanning,
	Watching,
	Stopping,
	Stopped,
	Failed,
}

#[derive(Debug, Clone)]
pub struct DirectoryWatcherConfig {
	pub path: PathBuf,
	pub volume_id: Option<String>,
	pub excludes: Vec<String>,
	pub poll_interval: Duration,
	pub run_initial_scan: bool,
}

impl DirectoryWatcherConfig {
	pub fn new(path: PathBuf) -> Self {
		Self { path, volume_id: None, excludes: Vec::new(), poll_interval: DEFAULT_POLL_INTERVAL, run_initial_scan: true }
	}
}

/// A live handle onto a running directory watcher task.
pub struct DirectoryWatcherHandle {
	stop_tx: watch::Sender<bool>,
	state: Arc<Mutex<WatcherState>>,
	pub resolved_path: PathBuf,
	pub volume_id: String,
	join: Option<tokio::task::JoinHandle<()>>,
}

impl DirectoryWatcherHandle {
	pub async fn state(&self) -> WatcherState {
		*self.state.lock().await
	}

	/// Signal cooperative shutdown and bound the wait (spec §5: joiners
	/// bound their wait, e.g. 2s, to avoid blocking on wedged host I/O).
	pub async fn stop(mut self) {
		let _ = self.stop_tx.send(true);
		if let Some(join) = self.join.take() {
			if tokio::time::timeout(Duration::from_secs(2), join).await.is_err() {
				warn!("directory watcher for {:?} did not stop within 2s", self.resolved_path);
			}
		}
	}
}

/// Spawns the watcher task and returns a handle to it.
pub struct DirectoryWatcher;

impl DirectoryWatcher {
	#[allow(clippy::too_many_arguments)]
	pub async fn spawn(
		store: CatalogStore, config: DirectoryWatcherConfig, mount_probe: Arc<dyn MountProbe>,
	) -> Result<DirectoryWatcherHandle> {
		let resolved_path = std::fs::canonicalize(&config.path).unwrap_or_else(|_| config.path.clone());
		let mount_info = mount_probe.probe(&resolved_path).await?;
		let volume_id = config.volume_id.clone().unwrap_or_else(|| mount_info.volume_id.clone());

		let state = Arc::new(Mutex::new(WatcherState::Created));
		let (stop_tx, stop_rx) = watch::channel(false);

		let task_state = state.clone();
		let task_store = store.clone();
		let task_config = config.clone();
		let task_volume_id = volume_id.clone();
		let task_mount_info = mount_info.metadata;
		let task_stop_rx = stop_rx.clone();
		let task_mount_probe = mount_probe.clone();

		let join = tokio::spawn(async move {
			run(task_store, task_config, task_volume_id, task_state, task_mount_info, task_stop_rx, task_mount_probe).await;
		});

		Ok(DirectoryWatcherHandle { stop_tx, state, resolved_path, volume_id, join: Some(join) })
	}
}

async fn run(
	store: CatalogStore, config: DirectoryWatcherConfig, volume_id: String,
	state: Arc<Mutex<WatcherState>>, mut mount_metadata: MountMetadata, mut stop_rx: watch::Receiver<bool>,
	mount_probe: Arc<dyn MountProbe>,
) {
	let excludes = compile_excludes(&config.excludes);

	if config.run_initial_scan {
		*state.lock().await = WatcherState::Scanning;
		let scan_job = match JobHandle::start(
			store.clone(),
			JobKind::InitialScan,
			Some(config.path.to_string_lossy().into_owned()),
			Some(volume_id.clone()),
			None,
		)
		.await
		{
			Ok(job) => job,
			Err(e) => {
				error!("failed to start initial_scan job for {:?}: {e}", config.path);
				*state.lock().await = WatcherState::Failed;
				return;
			}
		};
		let _ = scan_job.mark_running().await;
		match run_initial_scan(&store, &scan_job, &config.path, &volume_id, &excludes, Some(mount_metadata.clone()), stop_rx.clone()).await {
			Ok(ScanOutcome { progress, status }) => {
				let progress_json = serde_json::to_value(&progress).unwrap_or_default();
				match status {
					ScanStatus::Complete => {
						let _ = scan_job.complete(Some(progress_json)).await;
					}
					ScanStatus::Interrupted => {
						let _ = scan_job.interrupt().await;
						*state.lock().await = WatcherState::Stopped;
						return;
					}
				}
			}
			Err(e) => {
				error!("initial scan failed for {:?}: {e}", config.path);
				let _ = scan_job.fail(e.to_string()).await;
				*state.lock().await = WatcherState::Failed;
				return;
			}
		}
	}

	if *stop_rx.borrow() {
		*state.lock().await = WatcherState::Stopped;
		return;
	}

	*state.lock().await = WatcherState::Watching;
	let watcher_job = JobHandle::start(store.clone(), JobKind::Watcher, Some(config.path.to_string_lossy().into_owned()), Some(volume_id.clone()), None).await;
	let watcher_job = match watcher_job {
		Ok(j) => j,
		Err(e) => {
			error!("failed to start watcher job for {:?}: {e}", config.path);
			*state.lock().await = WatcherState::Failed;
			return;
		}
	};
	let _ = watcher_job.mark_running().await;

	let (notify_tx, notify_rx) = std::sync::mpsc::channel();
	let backend = match WatcherBackend::construct(&config.path, config.poll_interval, notify_tx) {
		Ok(backend) => backend,
		Err(e) => {
			error!("failed to construct watch backend for {:?}: {e}", config.path);
			let _ = watcher_job.fail(e.to_string()).await;
			*state.lock().await = WatcherState::Failed;
			return;
		}
	};
	if backend.kind == BackendKind::Polling {
		info!("watcher for {:?} fell back to polling backend", config.path);
	}

	let (event_tx, mut event_rx) = mpsc::channel(256);
	let _bridge = tokio::task::spawn_blocking(move || {
		for event in notify_rx {
			if event_tx.blocking_send(event).is_err() {
				break;
			}
		}
	});

	let mut reprobe_backoff = MOUNT_REPROBE_INITIAL;
	let mut last_reprobe_at = Instant::now();

	loop {
		tokio::select! {
			changed = stop_rx.changed() => {
				if changed.is_err() || *stop_rx.borrow() {
					*state.lock().await = WatcherState::Stopping;
					let _ = watcher_job.mark_stopping().await;
					break;
				}
			}
			maybe_event = event_rx.recv() => {
				match maybe_event {
					Some(Ok(event)) => {
						if !mount_metadata.is_complete() && last_reprobe_at.elapsed() >= reprobe_backoff {
							last_reprobe_at = Instant::now();
							match mount_probe.probe(&config.path).await {
								Ok(info) => mount_metadata = info.metadata,
								Err(e) => debug!("mount reprobe failed for {:?}: {e}", config.path),
							}
							reprobe_backoff = (reprobe_backoff * 2).min(MOUNT_REPROBE_MAX);
						}
						for path in &event.paths {
							if is_excluded(path, &excludes) {
								continue;
							}
							let Some(kind) = classify_event(&event.kind) else { continue };
							let directory = path.parent().map(|p| p.to_string_lossy().into_owned())
								.unwrap_or_else(|| config.path.to_string_lossy().into_owned());
							if let Err(e) = store.append_event(kind, path.to_string_lossy().to_string(), directory, volume_id.clone(), std::env::var("DISKWATCHER_PROCESS_ID").ok(), None, Some(mount_metadata.clone())).await {
								warn!("failed to append event for {path:?}: {e}");
							}
						}
					}
					Some(Err(e)) => warn!("watch backend error for {:?}: {e}", config.path),
					None => {
						debug!("watch event stream ended for {:?}", config.path);
						break;
					}
				}
			}
			_ = tokio::time::sleep(WATCHER_HEARTBEAT_INTERVAL) => {
				let _ = watcher_job.heartbeat(serde_json::json!({"idle": true})).await;
			}
		}
	}

	let _ = watcher_job.stop().await;
	*state.lock().await = WatcherState::Stopped;
}

fn is_excluded(path: &std::path::Path, excludes: &[Pattern]) -> bool {
	let path_str = path.to_string_lossy();
	excludes.iter().any(|p| p.matches(&path_str))
}

fn classify_event(kind: &notify::EventKind) -> Option<EventKind> {
	use notify::EventKind as NotifyKind;
	match kind {
		NotifyKind::Create(_) => Some(EventKind::Created),
		NotifyKind::Modify(_) => Some(EventKind::Modified),
		NotifyKind::Remove(_) => Some(EventKind::Deleted),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_notify_kinds() {
		use notify::event::{CreateKind, ModifyKind, RemoveKind};
		assert_eq!(classify_event(&notify::EventKind::Create(CreateKind::File)), Some(EventKind::Created));
		assert_eq!(classify_event(&notify::EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content))), Some(EventKind::Modified));
		assert_eq!(classify_event(&notify::EventKind::Remove(RemoveKind::File)), Some(EventKind::Deleted));
		assert_eq!(classify_event(&notify::EventKind::Access(notify::event::AccessKind::Any)), None);
	}
}
