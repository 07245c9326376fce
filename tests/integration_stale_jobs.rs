//! S6 — stale job cleanup on restart.

use diskwatcher::catalog::{CatalogConfig, CatalogStore, JobKind, JobStatus};
use diskwatcher::JobHandle;

// `JobHandle::start` always records the calling process's real pid and
// hostname, so distinguishing "abandoned" from "still alive" ownership
// takes separate stores rather than separate rows in one store — each
// exercises the same `cleanup_stale_jobs` call with the `is_alive` a real
// restart would plug in (a liveness check against the recorded pid).

#[tokio::test]
async fn abandoned_non_terminal_job_becomes_stale() {
	let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();
	let abandoned = JobHandle::start(store.clone(), JobKind::Watcher, Some("/mnt/old".into()), Some("vol-old".into()), None)
		.await
		.unwrap();
	abandoned.mark_running().await.unwrap();

	let this_host = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
	let marked = store.cleanup_stale_jobs(&this_host, |_pid| false).await.unwrap();
	assert_eq!(marked, 1);

	let row = abandoned.row().await.unwrap().expect("job row still present");
	assert_eq!(row.status, JobStatus::Stale);
	assert!(row.completed_at.is_some());
}

#[tokio::test]
async fn live_owner_and_terminal_jobs_are_left_alone() {
	let store = CatalogStore::open(CatalogConfig::in_memory()).unwrap();

	let still_running = JobHandle::start(store.clone(), JobKind::Watcher, Some("/mnt/here".into()), Some("vol-here".into()), None)
		.await
		.unwrap();
	still_running.mark_running().await.unwrap();

	let finished = JobHandle::start(store.clone(), JobKind::InitialScan, Some("/mnt/done".into()), Some("vol-done".into()), None)
		.await
		.unwrap();
	finished.complete(None).await.unwrap();

	let this_host = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
	// Even an `is_alive` that always answers true must not touch the
	// already-terminal job; only non-terminal jobs are candidates at all.
	let marked = store.cleanup_stale_jobs(&this_host, |_pid| true).await.unwrap();
	assert_eq!(marked, 0);

	let still_running_row = still_running.row().await.unwrap().expect("job row still present");
	assert_eq!(still_running_row.status, JobStatus::Running);

	let finished_row = finished.row().await.unwrap().expect("job row still present");
	assert_eq!(finished_row.status, JobStatus::Complete);
}
