//! Progress Monitor: read-only rendering of `initial_scan` job progress
//! (spec §4.7).

use std::io::Write;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::catalog::{CatalogStore, JobKind, JobStatus};
use crate::error::Result;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const NON_INTERACTIVE_THROTTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProgressSnapshot {
	pub total: usize,
	pub completed: usize,
	pub running: usize,
	pub failed: usize,
	pub files_scanned: u64,
}

/// Queries `initial_scan` jobs started at or after `batch_started` and
/// renders a one-line summary (spec §4.7). Purely read-only: never calls
/// any catalog write path.
pub struct ProgressMonitor {
	store: CatalogStore,
	batch_started: DateTime<Utc>,
	owner_pid: Option<String>,
	interactive: bool,
}

impl ProgressMonitor {
	pub fn new(store: CatalogStore, batch_started: DateTime<Utc>, owner_pid: Option<String>, interactive: bool) -> Self {
		Self { store, batch_started, owner_pid, interactive }
	}

	pub async fn snapshot(&self) -> Result<ProgressSnapshot> {
		let jobs = self.store.fetch_jobs(true, None).await?;
		let mut snapshot = ProgressSnapshot::default();

		for job in jobs {
			if job.kind != JobKind::InitialScan || job.started_at < self.batch_started {
				continue;
			}
			if let Some(pid) = &self.owner_pid {
				if &job.owner_pid != pid {
					continue;
				}
			}

			snapshot.total += 1;
			match job.status {
				JobStatus::Running => snapshot.running += 1,
				JobStatus::Failed => snapshot.failed += 1,
				status if status.is_terminal() => snapshot.completed += 1,
				_ => {}
			}
			if let Some(progress) = &job.progress {
				if let Some(files) = progress.get("files_scanned").and_then(|v| v.as_u64()) {
					snapshot.files_scanned += files;
				}
			}
		}
		Ok(snapshot)
	}

	/// Poll at `DEFAULT_POLL_INTERVAL` until every targeted job is terminal,
	/// rendering as it goes. Returns the final snapshot.
	pub async fn run_until_done(&self) -> Result<ProgressSnapshot> {
		let mut last_rendered = Instant::now() - NON_INTERACTIVE_THROTTLE;
		loop {
			let snapshot = self.snapshot().await?;
			self.maybe_render(&snapshot, &mut last_rendered);

			if snapshot.total > 0 && snapshot.completed + snapshot.failed >= snapshot.total {
				return Ok(snapshot);
			}
			tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
		}
	}

	fn maybe_render(&self, snapshot: &ProgressSnapshot, last_rendered: &mut Instant) {
		if self.interactive {
			print!("\rscanning: {}/{} complete, {} running, {} failed, {} files", snapshot.completed, snapshot.total, snapshot.running, snapshot.failed, snapshot.files_scanned);
			let _ = std::io::stdout().flush();
			*last_rendered = Instant::now();
			return;
		}

		if last_rendered.elapsed() >= NON_INTERACTIVE_THROTTLE {
			debug!("scan progress: {snapshot:?}");
			println!("scanning: {}/{} complete, {} running, {} failed, {} files", snapshot.completed, snapshot.total, snapshot.running, snapshot.failed, snapshot.files_scanned);
			*last_rendered = Instant::now();
		}
	}
}

/// Waits for any non-terminal `initial_scan` job to appear, tracks it to
/// completion, then repeats — covering auto-discovery-triggered scan
/// batches after the first (spec §4.7 "batch monitor").
pub struct BatchMonitor {
	store: CatalogStore,
	interactive: bool,
}

impl BatchMonitor {
	pub fn new(store: CatalogStore, interactive: bool) -> Self {
		Self { store, interactive }
	}

	/// Runs until `stop_rx` fires; intended to be spawned as its own task.
	pub async fn run(&self, mut stop_rx: tokio::sync::watch::Receiver<bool>) -> Result<()> {
		loop {
			if *stop_rx.borrow() {
				return Ok(());
			}

			let has_active = self
				.store
				.fetch_jobs(false, None)
				.await?
				.into_iter()
				.any(|job| job.kind == JobKind::InitialScan);

			if !has_active {
				tokio::select! {
					_ = stop_rx.changed() => if *stop_rx.borrow() { return Ok(()) },
					_ = tokio::time::sleep(DEFAULT_POLL_INTERVAL) => {}
				}
				continue;
			}

			let monitor = ProgressMonitor::new(self.store.clone(), Utc::now(), None, self.interactive);
			monitor.run_until_done().await?;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::CatalogConfig;
	use crate::jobs::JobHandle;

	#[tokio::test]
	async fn snapshot_counts_jobs_by_status() {
		let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
		let batch_started = Utc::now() - chrono::Duration::seconds(1);

		let running = JobHandle::start(store.clone(), JobKind::InitialScan, None, None, None).await.unwrap();
		running.mark_running().await.unwrap();
		let done = JobHandle::start(store.clone(), JobKind::InitialScan, None, None, None).await.unwrap();
		done.complete(None).await.unwrap();

		let monitor = ProgressMonitor::new(store, batch_started, None, false);
		let snapshot = monitor.snapshot().await.unwrap();
		assert_eq!(snapshot.total, 2);
		assert_eq!(snapshot.running, 1);
		assert_eq!(snapshot.completed, 1);
	}
}
