//! Job tracking handles for long-running activity (spec §3, §4.3).
//!
//! Grounded on `examples/original_source/src/diskwatcher/db/jobs.py`'s
//! `JobHandle`: a thin, cloneable handle carrying just the job id, with
//! `start`/`heartbeat`/`complete`/`fail` convenience methods that delegate
//! to the catalog's job primitives. The Python lock parameter is dropped
//! since `CatalogStore` already serializes writers behind its own mutex.

use uuid::Uuid;

use crate::catalog::{CatalogStore, JobKind, JobRow, JobStatus};
use crate::error::Result;

/// A handle onto one row in the `jobs` table.
#[derive(Clone)]
pub struct JobHandle {
	store: CatalogStore,
	job_id: String,
}

impl JobHandle {
	/// Create a new job row and return a handle to it (spec §4.3 `StartJob`).
	#[allow(clippy::too_many_arguments)]
	pub async fn start(
		store: CatalogStore, kind: JobKind, path: Option<String>, volume_id: Option<String>,
		progress: Option<serde_json::Value>,
	) -> Result<Self> {
		let job_id = Uuid::new_v4().to_string();
		let owner_pid = std::process::id().to_string();
		let owner_host = hostname();

		store
			.create_job(job_id.clone(), kind, path, volume_id, JobStatus::Queued, progress, owner_pid, owner_host)
			.await?;

		Ok(Self { store, job_id })
	}

	/// Attach a handle to an already-existing job id, without creating a row.
	pub fn attach(store: CatalogStore, job_id: impl Into<String>) -> Self {
		Self { store, job_id: job_id.into() }
	}

	pub fn job_id(&self) -> &str {
		&self.job_id
	}

	pub async fn update(&self, status: Option<JobStatus>, progress: Option<serde_json::Value>) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), status, progress, None, false).await
	}

	/// Record progress without changing status (spec §4.3 `Heartbeat`).
	pub async fn heartbeat(&self, progress: serde_json::Value) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), None, Some(progress), None, false).await
	}

	pub async fn mark_running(&self) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), Some(JobStatus::Running), None, None, false).await
	}

	pub async fn mark_stopping(&self) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), Some(JobStatus::Stopping), None, None, false).await
	}

	pub async fn complete(&self, progress: Option<serde_json::Value>) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), Some(JobStatus::Complete), progress, None, true).await
	}

	pub async fn fail(&self, error: impl Into<String>) -> Result<JobRow> {
		self
			.store
			.update_job(self.job_id.clone(), Some(JobStatus::Failed), None, Some(error.into()), true)
			.await
	}

	pub async fn cancel(&self) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), Some(JobStatus::Cancelled), None, None, true).await
	}

	pub async fn interrupt(&self) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), Some(JobStatus::Interrupted), None, None, true).await
	}

	pub async fn stop(&self) -> Result<JobRow> {
		self.store.update_job(self.job_id.clone(), Some(JobStatus::Stopped), None, None, true).await
	}

	pub async fn row(&self) -> Result<Option<JobRow>> {
		self.store.fetch_job(&self.job_id).await
	}
}

fn hostname() -> String {
	sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::CatalogConfig;

	#[tokio::test]
	async fn start_and_complete_job() {
		let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
		let handle = JobHandle::start(store, JobKind::InitialScan, Some("/data".into()), Some("vol-1".into()), None)
			.await
			.unwrap();

		handle.mark_running().await.unwrap();
		let row = handle.complete(None).await.unwrap();
		assert_eq!(row.status, JobStatus::Complete);
		assert!(row.completed_at.is_some());
	}

	#[tokio::test]
	async fn fail_records_error_message() {
		let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
		let handle = JobHandle::start(store, JobKind::Watcher, None, None, None).await.unwrap();
		let row = handle.fail("disk unreachable").await.unwrap();
		assert_eq!(row.status, JobStatus::Failed);
		assert_eq!(row.error_message.as_deref(), Some("disk unreachable"));
	}
}
