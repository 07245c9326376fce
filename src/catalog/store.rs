//! The sole writer gateway to the durable catalog (spec §4.1).
//!
//! Grounded on the teacher's `database::adapter::core::DatabaseAdapter`
//! shape (a cloneable adapter wrapping shared storage behind a lock,
//! exposing async methods), re-pointed at `rusqlite` instead of `redb` so
//! the literal relational schema in spec §6 can be expressed directly.
//! Retry-on-contention reuses the teacher's `RetryManager`/
//! `ErrorRecoveryConfig` pair from `src/retry.rs`.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use super::config::CatalogConfig;
use super::error::{CatalogError, CatalogResult};
use super::schema;
use super::types::{
	CapacitySnapshot, EventKind, EventRow, FileRow, FileSummary, JobKind, JobRow, JobStatus, MountMetadata,
	VolumeRow, VolumeSummary,
};
use crate::error::ErrorRecoveryConfig;
use crate::retry::RetryManager;

/// Basename deny-set for File derivation (spec §4.1 File derivation rule):
/// editor/OS droppings are never upserted into `files`, though their Event
/// row is still appended (spec §9 open question 1 resolves in favor of
/// symmetry between scan and live events: only File derivation is suppressed).
const DENY_BASENAMES: &[&str] = &[".DS_Store", "Thumbs.db"];
const DENY_SUFFIXES: &[&str] = &[".lock", ".tmp", ".swp", ".swx", "~"];

fn is_denied_for_file_derivation(path: &str) -> bool {
	let basename = Path::new(path).file_name().and_then(|s| s.to_str()).unwrap_or(path);
	if DENY_BASENAMES.contains(&basename) {
		return true;
	}
	DENY_SUFFIXES.iter().any(|suffix| basename.ends_with(suffix))
}

const CAPACITY_REFRESH_INTERVAL: chrono::Duration = chrono::Duration::seconds(300);
const CAPACITY_REFRESH_EVENT_THRESHOLD: i64 = 100;

/// Handle onto the shared catalog. Cheap to clone: the underlying
/// connection and writer mutex are shared via `Arc`.
#[derive(Clone)]
pub struct CatalogStore {
	conn: Arc<AsyncMutex<Connection>>,
	retry: Arc<RetryManager>,
	database_path: Option<PathBuf>,
	read_only: bool,
}

impl CatalogStore {
	/// Open (or create) the catalog and run schema migrations. Read-only
	/// consumers pass a config built with `.read_only()`, which opens the
	/// connection in sqlite's immutable/read-only mode so any attempted
	/// write fails (spec §4.1).
	pub fn open(config: CatalogConfig) -> CatalogResult<Self> {
		let conn = match &config.database_path {
			Some(path) => {
				if config.read_only {
					let flags = rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI;
					Connection::open_with_flags(path, flags)
						.map_err(|e| CatalogError::ConnectionFailed(e.to_string()))?
				} else {
					Connection::open(path).map_err(|e| CatalogError::ConnectionFailed(e.to_string()))?
				}
			}
			None => Connection::open_in_memory().map_err(|e| CatalogError::ConnectionFailed(e.to_string()))?,
		};

		conn.pragma_update(None, "foreign_keys", "ON")?;
		conn.busy_timeout(config.busy_timeout)?;
		if !config.read_only {
			// WAL is a no-op (and briefly errors) against an in-memory database.
			if config.database_path.is_some() {
				let _: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
			}
			schema::migrate(&conn)?;
		}

		Ok(Self {
			conn: Arc::new(AsyncMutex::new(conn)),
			retry: Arc::new(RetryManager::new(ErrorRecoveryConfig::catalog_write_policy())),
			database_path: config.database_path,
			read_only: config.read_only,
		})
	}

	/// The catalog's on-disk path, if any. `RunInitialScans(parallel=true)`
	/// uses this to open independent per-worker connections (spec §4.5);
	/// `None` means in-memory, which forces serial mode.
	pub fn database_path(&self) -> Option<&Path> {
		self.database_path.as_deref()
	}

	pub fn is_read_only(&self) -> bool {
		self.read_only
	}

	/// Open a fresh, independent connection against the same on-disk file.
	/// Used by the parallel scan worker pool (spec §4.5): each worker gets
	/// its own connection, relying on sqlite's own locking plus this
	/// method's retry wrapper for contention.
	pub fn reopen(&self) -> CatalogResult<Self> {
		match &self.database_path {
			Some(path) => Self::open(CatalogConfig::file(path.clone())),
			None => Err(CatalogError::InvalidConfiguration(
				"cannot reopen an in-memory catalog from another connection".into(),
			)),
		}
	}

	async fn with_retry<T, F>(&self, operation: &str, f: F) -> crate::error::Result<T>
	where
		T: Send + 'static,
		F: Fn(&Connection) -> CatalogResult<T> + Send + Sync + 'static,
	{
		let conn = self.conn.clone();
		let f = Arc::new(f);
		self
			.retry
			.execute_simple(operation, move || {
				let conn = conn.clone();
				let f = f.clone();
				async move {
					let guard = conn.lock().await;
					f(&guard).map_err(crate::error::DiskWatcherError::from)
				}
			})
			.await
	}

	/// Insert an Event row and, in the same transaction, update the
	/// derived Volume and File rows (spec §4.1 `AppendEvent`).
	#[allow(clippy::too_many_arguments)]
	pub async fn append_event(
		&self, kind: EventKind, path: impl Into<String>, directory: impl Into<String>,
		volume_id: impl Into<String>, process_id: Option<String>, timestamp: Option<DateTime<Utc>>,
		mount_metadata: Option<MountMetadata>,
	) -> crate::error::Result<EventRow> {
		let path = path.into();
		let directory = directory.into();
		let volume_id = volume_id.into();
		let timestamp = timestamp.unwrap_or_else(Utc::now);

		self
			.with_retry("append_event", move |conn| {
				append_event_tx(
					conn,
					kind,
					&path,
					&directory,
					&volume_id,
					process_id.as_deref(),
					timestamp,
					mount_metadata.as_ref(),
				)
			})
			.await
	}

	pub async fn summarize_by_volume(&self) -> crate::error::Result<Vec<VolumeSummary>> {
		self.with_retry("summarize_by_volume", |conn| summarize_by_volume_q(conn)).await
	}

	pub async fn summarize_files(&self, limit: i64) -> crate::error::Result<Vec<FileSummary>> {
		self.with_retry("summarize_files", move |conn| summarize_files_q(conn, limit)).await
	}

	pub async fn query_events(&self, limit: i64) -> crate::error::Result<Vec<EventRow>> {
		self.with_retry("query_events", move |conn| query_events_q(conn, limit)).await
	}

	pub async fn query_events_since(&self, row_ordinal: i64, limit: i64) -> crate::error::Result<Vec<EventRow>> {
		self
			.with_retry("query_events_since", move |conn| query_events_since_q(conn, row_ordinal, limit))
			.await
	}

	pub async fn fetch_volume_metadata(&self) -> crate::error::Result<Vec<VolumeRow>> {
		self.with_retry("fetch_volume_metadata", |conn| fetch_volumes_q(conn)).await
	}

	pub async fn fetch_jobs(&self, include_finished: bool, limit: Option<i64>) -> crate::error::Result<Vec<JobRow>> {
		self
			.with_retry("fetch_jobs", move |conn| fetch_jobs_q(conn, include_finished, limit))
			.await
	}

	pub async fn fetch_job(&self, job_id: &str) -> crate::error::Result<Option<JobRow>> {
		let job_id = job_id.to_string();
		self.with_retry("fetch_job", move |conn| fetch_job_q(conn, &job_id)).await
	}

	/// Create a job row (spec §4.3 `StartJob`).
	#[allow(clippy::too_many_arguments)]
	pub(crate) async fn create_job(
		&self, job_id: String, kind: JobKind, path: Option<String>, volume_id: Option<String>, status: JobStatus,
		progress: Option<serde_json::Value>, owner_pid: String, owner_host: String,
	) -> crate::error::Result<JobRow> {
		self
			.with_retry("create_job", move |conn| {
				create_job_tx(
					conn,
					&job_id,
					kind,
					path.as_deref(),
					volume_id.as_deref(),
					status,
					progress.as_ref(),
					&owner_pid,
					&owner_host,
				)
			})
			.await
	}

	/// Update a job row (spec §4.3 `Update`/`Heartbeat`/`Complete`/`Fail`).
	/// Returns `JobStateError` if the job is already terminal, per spec §8
	/// testable property 6.
	pub(crate) async fn update_job(
		&self, job_id: String, status: Option<JobStatus>, progress: Option<serde_json::Value>,
		error: Option<String>, mark_completed: bool,
	) -> crate::error::Result<JobRow> {
		self
			.with_retry("update_job", move |conn| {
				update_job_tx(conn, &job_id, status, progress.as_ref(), error.as_deref(), mark_completed)
			})
			.await
	}

	/// Run SQLite's `VACUUM` (spec §4.8 `dev vacuum`).
	pub async fn vacuum(&self) -> crate::error::Result<()> {
		self.with_retry("vacuum", |conn| conn.execute_batch("VACUUM").map_err(CatalogError::from)).await
	}

	/// Run SQLite's `PRAGMA integrity_check` (spec §4.8 `dev integrity`).
	pub async fn integrity_check(&self) -> crate::error::Result<bool> {
		self
			.with_retry("integrity_check", |conn| {
				let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
				Ok(result == "ok")
			})
			.await
	}

	/// Mark every non-terminal job whose owner is not alive (or whose host
	/// differs from this host) as `stale` (spec §4.3 `CleanupStaleJobs`).
	pub async fn cleanup_stale_jobs(&self, this_host: &str, is_alive: impl Fn(&str) -> bool) -> crate::error::Result<usize> {
		let jobs = self.fetch_jobs(false, None).await?;
		let mut marked = 0;
		for job in jobs {
			if job.status.is_terminal() {
				continue;
			}
			let alive = job.owner_host == this_host && is_alive(&job.owner_pid);
			if !alive {
				self
					.update_job(job.job_id.clone(), Some(JobStatus::Stale), None, None, true)
					.await?;
				marked += 1;
			}
		}
		Ok(marked)
	}
}

#[allow(clippy::too_many_arguments)]
fn append_event_tx(
	conn: &Connection, kind: EventKind, path: &str, directory: &str, volume_id: &str, process_id: Option<&str>,
	timestamp: DateTime<Utc>, mount_metadata: Option<&MountMetadata>,
) -> CatalogResult<EventRow> {
	let timestamp_str = timestamp.to_rfc3339();

	conn.execute(
		"INSERT INTO events (timestamp, event_type, path, directory, volume_id, process_id)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
		rusqlite::params![timestamp_str, kind.as_str(), path, directory, volume_id, process_id],
	)?;
	let id = conn.last_insert_rowid();

	upsert_volume_counters(conn, volume_id, directory, kind, timestamp, mount_metadata)?;
	derive_file_row(conn, volume_id, path, directory, kind, timestamp)?;

	Ok(EventRow {
		id,
		timestamp,
		kind,
		path: path.to_string(),
		directory: directory.to_string(),
		volume_id: volume_id.to_string(),
		process_id: process_id.map(|s| s.to_string()),
	})
}

fn upsert_volume_counters(
	conn: &Connection, volume_id: &str, directory: &str, kind: EventKind, timestamp: DateTime<Utc>,
	mount_metadata: Option<&MountMetadata>,
) -> CatalogResult<()> {
	let timestamp_str = timestamp.to_rfc3339();
	let exists: Option<i64> = conn
		.query_row("SELECT 1 FROM volumes WHERE volume_id = ?1", [volume_id], |row| row.get(0))
		.optional()?;

	if exists.is_none() {
		conn.execute(
			"INSERT INTO volumes (volume_id, directory, event_count, created_count, modified_count,
				deleted_count, last_event_timestamp, events_since_refresh)
			 VALUES (?1, ?2, 0, 0, 0, 0, NULL, 0)",
			[volume_id, directory],
		)?;
	}

	let (created_inc, modified_inc, deleted_inc) = match kind {
		EventKind::Created | EventKind::Existing => (1, 0, 0),
		EventKind::Modified => (0, 1, 0),
		EventKind::Deleted => (0, 0, 1),
	};

	conn.execute(
		"UPDATE volumes SET
			event_count = event_count + 1,
			created_count = created_count + ?1,
			modified_count = modified_count + ?2,
			deleted_count = deleted_count + ?3,
			last_event_timestamp = ?4,
			events_since_refresh = events_since_refresh + 1
		 WHERE volume_id = ?5",
		rusqlite::params![created_inc, modified_inc, deleted_inc, timestamp_str, volume_id],
	)?;

	if let Some(meta) = mount_metadata {
		persist_mount_identity(conn, volume_id, meta, timestamp)?;
	}

	maybe_refresh_capacity(conn, volume_id, directory, timestamp)?;

	Ok(())
}

/// Only set columns that are present and truthy in `meta`; never clobber a
/// known value with null (spec §4.1 Mount identity persistence, §8
/// testable property 5).
fn persist_mount_identity(
	conn: &Connection, volume_id: &str, meta: &MountMetadata, timestamp: DateTime<Utc>,
) -> CatalogResult<()> {
	macro_rules! set_if_present {
		($column:literal, $value:expr) => {
			if let Some(value) = $value.as_deref().filter(|v| !v.is_empty()) {
				conn.execute(
					concat!("UPDATE volumes SET ", $column, " = ?1 WHERE volume_id = ?2"),
					rusqlite::params![value, volume_id],
				)?;
			}
		};
	}

	let mut touched = false;
	macro_rules! track {
		($value:expr) => {
			if $value.as_deref().filter(|v: &&str| !v.is_empty()).is_some() {
				touched = true;
			}
		};
	}

	track!(meta.device);
	track!(meta.mount_point);
	track!(meta.uuid);
	track!(meta.label);
	track!(meta.volume_id);
	track!(meta.lsblk_ptuuid);
	track!(meta.lsblk_partuuid);
	track!(meta.lsblk_serial);
	track!(meta.lsblk_wwn);

	set_if_present!("mount_device", meta.device);
	set_if_present!("mount_point", meta.mount_point);
	set_if_present!("mount_uuid", meta.uuid);
	set_if_present!("mount_label", meta.label);
	set_if_present!("mount_volume_id", meta.volume_id);
	set_if_present!("lsblk_name", meta.lsblk_name);
	set_if_present!("lsblk_path", meta.lsblk_path);
	set_if_present!("lsblk_model", meta.lsblk_model);
	set_if_present!("lsblk_serial", meta.lsblk_serial);
	set_if_present!("lsblk_vendor", meta.lsblk_vendor);
	set_if_present!("lsblk_size", meta.lsblk_size);
	set_if_present!("lsblk_fsver", meta.lsblk_fsver);
	set_if_present!("lsblk_pttype", meta.lsblk_pttype);
	set_if_present!("lsblk_ptuuid", meta.lsblk_ptuuid);
	set_if_present!("lsblk_parttype", meta.lsblk_parttype);
	set_if_present!("lsblk_partuuid", meta.lsblk_partuuid);
	set_if_present!("lsblk_parttypename", meta.lsblk_parttypename);
	set_if_present!("lsblk_wwn", meta.lsblk_wwn);
	set_if_present!("lsblk_maj_min", meta.lsblk_maj_min);
	if let Some(json) = &meta.lsblk_json {
		touched = true;
		conn.execute(
			"UPDATE volumes SET lsblk_json = ?1 WHERE volume_id = ?2",
			rusqlite::params![json, volume_id],
		)?;
	}

	if touched {
		conn.execute(
			"UPDATE volumes SET identity_refreshed_at = ?1 WHERE volume_id = ?2",
			rusqlite::params![timestamp.to_rfc3339(), volume_id],
		)?;
	}

	Ok(())
}

/// Capacity refresh rule (spec §4.1): refresh if no prior
/// `usage_refreshed_at`, >= 300s elapsed, or events_since_refresh >= 100.
fn maybe_refresh_capacity(
	conn: &Connection, volume_id: &str, directory: &str, timestamp: DateTime<Utc>,
) -> CatalogResult<()> {
	let row: (Option<String>, i64) = conn.query_row(
		"SELECT usage_refreshed_at, events_since_refresh FROM volumes WHERE volume_id = ?1",
		[volume_id],
		|row| Ok((row.get(0)?, row.get(1)?)),
	)?;
	let (usage_refreshed_at, events_since_refresh) = row;

	let stale = match &usage_refreshed_at {
		None => true,
		Some(raw) => match DateTime::parse_from_rfc3339(raw) {
			Ok(prior) => timestamp.signed_duration_since(prior) >= CAPACITY_REFRESH_INTERVAL,
			Err(_) => true,
		},
	};

	if !stale && events_since_refresh < CAPACITY_REFRESH_EVENT_THRESHOLD {
		return Ok(());
	}

	match read_capacity(Path::new(directory)) {
		Ok(snapshot) => {
			conn.execute(
				"UPDATE volumes SET usage_total_bytes = ?1, usage_used_bytes = ?2, usage_free_bytes = ?3,
					usage_refreshed_at = ?4, events_since_refresh = 0
				 WHERE volume_id = ?5",
				rusqlite::params![
					snapshot.total_bytes as i64,
					snapshot.used_bytes as i64,
					snapshot.free_bytes as i64,
					timestamp.to_rfc3339(),
					volume_id
				],
			)?;
		}
		Err(e) => {
			// A failure to read capacity is non-fatal and leaves previous
			// values intact (spec §4.1).
			warn!("failed to refresh capacity for volume {volume_id}: {e}");
		}
	}

	Ok(())
}

#[cfg(unix)]
fn read_capacity(path: &Path) -> std::io::Result<CapacitySnapshot> {
	let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
	let block_size = stat.fragment_size();
	let total = stat.blocks() * block_size;
	let free = stat.blocks_free() * block_size;
	let avail = stat.blocks_available() * block_size;
	Ok(CapacitySnapshot { total_bytes: total, used_bytes: total.saturating_sub(free), free_bytes: avail })
}

#[cfg(not(unix))]
fn read_capacity(_path: &Path) -> std::io::Result<CapacitySnapshot> {
	Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "capacity probing not supported on this platform"))
}

/// File derivation rule (spec §4.1).
fn derive_file_row(
	conn: &Connection, volume_id: &str, path: &str, directory: &str, kind: EventKind, timestamp: DateTime<Utc>,
) -> CatalogResult<()> {
	if is_denied_for_file_derivation(path) {
		return Ok(());
	}
	let timestamp_str = timestamp.to_rfc3339();

	if kind == EventKind::Deleted {
		conn.execute(
			"INSERT INTO files (volume_id, path, directory, size_bytes, modified_time, created_time,
				last_event_timestamp, last_event_type, is_deleted)
			 VALUES (?1, ?2, ?3, NULL, NULL,
				(SELECT created_time FROM files WHERE volume_id = ?1 AND path = ?2), ?4, ?5, 1)
			 ON CONFLICT(volume_id, path) DO UPDATE SET
				size_bytes = NULL, modified_time = NULL,
				last_event_timestamp = excluded.last_event_timestamp,
				last_event_type = excluded.last_event_type, is_deleted = 1",
			rusqlite::params![volume_id, path, directory, timestamp_str, kind.as_str()],
		)?;
		return Ok(());
	}

	let metadata = match std::fs::metadata(path) {
		Ok(m) => m,
		Err(_) => return Ok(()), // path vanished between event and stat; skip, do not error
	};
	if !metadata.is_file() {
		return Ok(());
	}
	let size_bytes = metadata.len() as i64;
	let modified_time = metadata.modified().ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339());
	let created_time = metadata.created().ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339());

	conn.execute(
		"INSERT INTO files (volume_id, path, directory, size_bytes, modified_time, created_time,
			last_event_timestamp, last_event_type, is_deleted)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
		 ON CONFLICT(volume_id, path) DO UPDATE SET
			size_bytes = excluded.size_bytes,
			modified_time = excluded.modified_time,
			created_time = COALESCE(files.created_time, excluded.created_time),
			last_event_timestamp = excluded.last_event_timestamp,
			last_event_type = excluded.last_event_type,
			is_deleted = 0",
		rusqlite::params![volume_id, path, directory, size_bytes, modified_time, created_time, timestamp_str, kind.as_str()],
	)?;

	Ok(())
}

fn query_events_q(conn: &Connection, limit: i64) -> CatalogResult<Vec<EventRow>> {
	let mut stmt = conn.prepare(
		"SELECT id, timestamp, event_type, path, directory, volume_id, process_id
		 FROM events ORDER BY id DESC LIMIT ?1",
	)?;
	let rows = stmt.query_map([limit], row_to_event)?;
	rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
}

fn query_events_since_q(conn: &Connection, row_ordinal: i64, limit: i64) -> CatalogResult<Vec<EventRow>> {
	let mut stmt = conn.prepare(
		"SELECT id, timestamp, event_type, path, directory, volume_id, process_id
		 FROM events WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
	)?;
	let rows = stmt.query_map(rusqlite::params![row_ordinal, limit], row_to_event)?;
	rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
	let kind_str: String = row.get(2)?;
	let timestamp_str: String = row.get(1)?;
	Ok(EventRow {
		id: row.get(0)?,
		timestamp: parse_ts(&timestamp_str),
		kind: EventKind::parse(&kind_str).unwrap_or(EventKind::Existing),
		path: row.get(3)?,
		directory: row.get(4)?,
		volume_id: row.get(5)?,
		process_id: row.get(6)?,
	})
}

fn summarize_by_volume_q(conn: &Connection) -> CatalogResult<Vec<VolumeSummary>> {
	let mut stmt = conn.prepare(
		"SELECT volume_id, directory, COUNT(*) AS total,
			SUM(CASE WHEN event_type = 'created' THEN 1 ELSE 0 END),
			SUM(CASE WHEN event_type = 'modified' THEN 1 ELSE 0 END),
			SUM(CASE WHEN event_type = 'deleted' THEN 1 ELSE 0 END),
			MIN(timestamp), MAX(timestamp)
		 FROM events GROUP BY volume_id, directory ORDER BY MAX(timestamp) DESC",
	)?;
	let rows = stmt.query_map([], |row| {
		let first: Option<String> = row.get(6)?;
		let last: Option<String> = row.get(7)?;
		Ok(VolumeSummary {
			volume_id: row.get(0)?,
			directory: row.get(1)?,
			total_events: row.get(2)?,
			created: row.get(3)?,
			modified: row.get(4)?,
			deleted: row.get(5)?,
			first_seen: first.as_deref().map(parse_ts),
			last_seen: last.as_deref().map(parse_ts),
		})
	})?;
	rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
}

fn summarize_files_q(conn: &Connection, limit: i64) -> CatalogResult<Vec<FileSummary>> {
	let mut stmt = conn.prepare(
		"SELECT e.path, e.volume_id, e.directory, COUNT(*) AS total,
			MIN(e.timestamp), MAX(e.timestamp),
			(SELECT latest.event_type FROM events AS latest
			 WHERE latest.path = e.path AND latest.volume_id = e.volume_id
			 ORDER BY latest.timestamp DESC LIMIT 1)
		 FROM events AS e GROUP BY e.path, e.volume_id, e.directory
		 ORDER BY MAX(e.timestamp) DESC LIMIT ?1",
	)?;
	let rows = stmt.query_map([limit], |row| {
		let first: Option<String> = row.get(4)?;
		let last: Option<String> = row.get(5)?;
		let last_kind: Option<String> = row.get(6)?;
		Ok(FileSummary {
			path: row.get(0)?,
			volume_id: row.get(1)?,
			directory: row.get(2)?,
			total_events: row.get(3)?,
			first_seen: first.as_deref().map(parse_ts),
			last_seen: last.as_deref().map(parse_ts),
			last_event_type: last_kind.as_deref().and_then(EventKind::parse),
		})
	})?;
	rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
}

fn fetch_volumes_q(conn: &Connection) -> CatalogResult<Vec<VolumeRow>> {
	let mut stmt = conn.prepare("SELECT * FROM volumes ORDER BY last_event_timestamp DESC")?;
	let rows = stmt.query_map([], row_to_volume)?;
	rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
}

fn row_to_volume(row: &rusqlite::Row<'_>) -> rusqlite::Result<VolumeRow> {
	let last_event_timestamp: Option<String> = row.get("last_event_timestamp")?;
	let usage_refreshed_at: Option<String> = row.get("usage_refreshed_at")?;
	let identity_refreshed_at: Option<String> = row.get("identity_refreshed_at")?;
	Ok(VolumeRow {
		volume_id: row.get("volume_id")?,
		directory: row.get("directory")?,
		event_count: row.get("event_count")?,
		created_count: row.get("created_count")?,
		modified_count: row.get("modified_count")?,
		deleted_count: row.get("deleted_count")?,
		last_event_timestamp: last_event_timestamp.as_deref().map(parse_ts),
		usage_total_bytes: row.get("usage_total_bytes")?,
		usage_used_bytes: row.get("usage_used_bytes")?,
		usage_free_bytes: row.get("usage_free_bytes")?,
		usage_refreshed_at: usage_refreshed_at.as_deref().map(parse_ts),
		events_since_refresh: row.get("events_since_refresh")?,
		mount_device: row.get("mount_device")?,
		mount_point: row.get("mount_point")?,
		mount_uuid: row.get("mount_uuid")?,
		mount_label: row.get("mount_label")?,
		mount_volume_id: row.get("mount_volume_id")?,
		lsblk_name: row.get("lsblk_name")?,
		lsblk_path: row.get("lsblk_path")?,
		lsblk_model: row.get("lsblk_model")?,
		lsblk_serial: row.get("lsblk_serial")?,
		lsblk_vendor: row.get("lsblk_vendor")?,
		lsblk_size: row.get("lsblk_size")?,
		lsblk_fsver: row.get("lsblk_fsver")?,
		lsblk_pttype: row.get("lsblk_pttype")?,
		lsblk_ptuuid: row.get("lsblk_ptuuid")?,
		lsblk_parttype: row.get("lsblk_parttype")?,
		lsblk_partuuid: row.get("lsblk_partuuid")?,
		lsblk_parttypename: row.get("lsblk_parttypename")?,
		lsblk_wwn: row.get("lsblk_wwn")?,
		lsblk_maj_min: row.get("lsblk_maj_min")?,
		lsblk_json: row.get("lsblk_json")?,
		identity_refreshed_at: identity_refreshed_at.as_deref().map(parse_ts),
		label_index: row.get("label_index")?,
	})
}

#[allow(clippy::too_many_arguments)]
fn create_job_tx(
	conn: &Connection, job_id: &str, kind: JobKind, path: Option<&str>, volume_id: Option<&str>, status: JobStatus,
	progress: Option<&serde_json::Value>, owner_pid: &str, owner_host: &str,
) -> CatalogResult<JobRow> {
	let now = Utc::now();
	let now_str = now.to_rfc3339();
	let progress_json = progress.map(serde_json::to_string).transpose()?;

	conn.execute(
		"INSERT INTO jobs (job_id, job_type, path, volume_id, status, progress_json, owner_pid, owner_host,
			started_at, updated_at)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
		rusqlite::params![job_id, kind.as_str(), path, volume_id, status.as_str(), progress_json, owner_pid, owner_host, now_str],
	)?;

	Ok(JobRow {
		job_id: job_id.to_string(),
		kind,
		path: path.map(|s| s.to_string()),
		volume_id: volume_id.map(|s| s.to_string()),
		status,
		progress: progress.cloned(),
		owner_pid: owner_pid.to_string(),
		owner_host: owner_host.to_string(),
		error_message: None,
		started_at: now,
		updated_at: now,
		completed_at: None,
	})
}

fn update_job_tx(
	conn: &Connection, job_id: &str, status: Option<JobStatus>, progress: Option<&serde_json::Value>,
	error: Option<&str>, mark_completed: bool,
) -> CatalogResult<JobRow> {
	let current = fetch_job_q(conn, job_id)?.ok_or_else(|| CatalogError::TransactionFailed(format!("job {job_id} not found")))?;
	if current.status.is_terminal() {
		return Err(CatalogError::JobTerminal(job_id.to_string()));
	}

	let now = Utc::now().to_rfc3339();
	let progress_json = progress.map(serde_json::to_string).transpose()?;

	conn.execute(
		"UPDATE jobs SET
			updated_at = ?1,
			status = COALESCE(?2, status),
			progress_json = COALESCE(?3, progress_json),
			error_message = COALESCE(?4, error_message),
			completed_at = CASE WHEN ?5 THEN ?1 ELSE completed_at END
		 WHERE job_id = ?6",
		rusqlite::params![now, status.map(|s| s.as_str()), progress_json, error, mark_completed, job_id],
	)?;

	fetch_job_q(conn, job_id)?.ok_or_else(|| CatalogError::TransactionFailed(format!("job {job_id} vanished")))
}

fn fetch_job_q(conn: &Connection, job_id: &str) -> CatalogResult<Option<JobRow>> {
	conn
		.query_row("SELECT * FROM jobs WHERE job_id = ?1", [job_id], row_to_job)
		.optional()
		.map_err(CatalogError::from)
}

fn fetch_jobs_q(conn: &Connection, include_finished: bool, limit: Option<i64>) -> CatalogResult<Vec<JobRow>> {
	let mut query = if include_finished {
		"SELECT * FROM jobs ORDER BY updated_at DESC".to_string()
	} else {
		"SELECT * FROM jobs WHERE status NOT IN ('complete','failed','interrupted','cancelled','removed','stopped','stale') ORDER BY updated_at DESC".to_string()
	};
	if let Some(limit) = limit {
		query.push_str(&format!(" LIMIT {limit}"));
	}
	let mut stmt = conn.prepare(&query)?;
	let rows = stmt.query_map([], row_to_job)?;
	rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CatalogError::from)
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
	let kind_str: String = row.get("job_type")?;
	let status_str: String = row.get("status")?;
	let started_at: String = row.get("started_at")?;
	let updated_at: String = row.get("updated_at")?;
	let completed_at: Option<String> = row.get("completed_at")?;
	let progress_json: Option<String> = row.get("progress_json")?;

	Ok(JobRow {
		job_id: row.get("job_id")?,
		kind: if kind_str == "watcher" { JobKind::Watcher } else { JobKind::InitialScan },
		path: row.get("path")?,
		volume_id: row.get("volume_id")?,
		status: JobStatus::parse(&status_str).unwrap_or(JobStatus::Failed),
		progress: progress_json.and_then(|s| serde_json::from_str(&s).ok()),
		owner_pid: row.get("owner_pid")?,
		owner_host: row.get("owner_host")?,
		error_message: row.get("error_message")?,
		started_at: parse_ts(&started_at),
		updated_at: parse_ts(&updated_at),
		completed_at: completed_at.as_deref().map(parse_ts),
	})
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
	DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn memory_store() -> CatalogStore {
		CatalogStore::open(CatalogConfig::in_memory()).unwrap()
	}

	#[tokio::test]
	async fn append_event_creates_volume_and_counts() {
		let store = memory_store();
		store
			.append_event(EventKind::Created, "/data/a.txt", "/data", "vol-1", None, None, None)
			.await
			.unwrap();
		store
			.append_event(EventKind::Modified, "/data/a.txt", "/data", "vol-1", None, None, None)
			.await
			.unwrap();

		let volumes = store.fetch_volume_metadata().await.unwrap();
		assert_eq!(volumes.len(), 1);
		assert_eq!(volumes[0].event_count, 2);
		assert_eq!(volumes[0].created_count, 1);
		assert_eq!(volumes[0].modified_count, 1);
	}

	#[tokio::test]
	async fn deleted_event_tombstones_file_row() {
		let store = memory_store();
		let dir = tempfile::tempdir().unwrap();
		let file_path = dir.path().join("a.txt");
		std::fs::write(&file_path, b"hi").unwrap();

		store
			.append_event(
				EventKind::Created,
				file_path.to_string_lossy().to_string(),
				dir.path().to_string_lossy().to_string(),
				"vol-1",
				None,
				None,
				None,
			)
			.await
			.unwrap();
		store
			.append_event(
				EventKind::Deleted,
				file_path.to_string_lossy().to_string(),
				dir.path().to_string_lossy().to_string(),
				"vol-1",
				None,
				None,
				None,
			)
			.await
			.unwrap();

		let volumes = store.fetch_volume_metadata().await.unwrap();
		assert_eq!(volumes[0].deleted_count, 1);
	}

	#[tokio::test]
	async fn denied_basenames_skip_file_derivation_but_log_event() {
		let store = memory_store();
		store
			.append_event(EventKind::Existing, "/data/.DS_Store", "/data", "vol-1", None, None, None)
			.await
			.unwrap();

		let events = store.query_events(10).await.unwrap();
		assert_eq!(events.len(), 1, "the Event row is still appended");
	}

	#[tokio::test]
	async fn mount_identity_never_clobbered_with_null() {
		let store = memory_store();
		let meta = MountMetadata { uuid: Some("uuid-1".into()), ..Default::default() };
		store
			.append_event(EventKind::Created, "/data/a.txt", "/data", "vol-1", None, None, Some(meta))
			.await
			.unwrap();
		store
			.append_event(EventKind::Modified, "/data/a.txt", "/data", "vol-1", None, None, Some(MountMetadata::default()))
			.await
			.unwrap();

		let volumes = store.fetch_volume_metadata().await.unwrap();
		assert_eq!(volumes[0].mount_uuid.as_deref(), Some("uuid-1"));
	}

	#[tokio::test]
	async fn job_lifecycle_rejects_updates_after_terminal() {
		let store = memory_store();
		let job = store
			.create_job(
				"job-1".into(),
				JobKind::InitialScan,
				None,
				None,
				JobStatus::Queued,
				None,
				"1".into(),
				"host".into(),
			)
			.await
			.unwrap();
		store.update_job(job.job_id.clone(), Some(JobStatus::Complete), None, None, true).await.unwrap();

		let result = store.update_job(job.job_id.clone(), Some(JobStatus::Running), None, None, false).await;
		assert!(result.is_err());

		let fetched = store.fetch_job(&job.job_id).await.unwrap().unwrap();
		assert!(fetched.completed_at.is_some());
		assert_eq!(fetched.status, JobStatus::Complete);
	}
}
