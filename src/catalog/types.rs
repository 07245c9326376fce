//! Row and enum types for the catalog (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event kind recognized by the core (spec §3, §6). `Existing` is emitted
/// only by the initial archival scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
	Created,
	Modified,
	Deleted,
	Existing,
}

impl EventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventKind::Created => "created",
			EventKind::Modified => "modified",
			EventKind::Deleted => "deleted",
			EventKind::Existing => "existing",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"created" => Some(EventKind::Created),
			"modified" => Some(EventKind::Modified),
			"deleted" => Some(EventKind::Deleted),
			"existing" => Some(EventKind::Existing),
			_ => None,
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// An immutable append-only record of one filesystem observation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
	pub id: i64,
	pub timestamp: DateTime<Utc>,
	pub kind: EventKind,
	pub path: String,
	pub directory: String,
	pub volume_id: String,
	pub process_id: Option<String>,
}

/// Mount identity attributes attached to a Volume row (spec §4.2, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountMetadata {
	pub device: Option<String>,
	pub mount_point: Option<String>,
	pub uuid: Option<String>,
	pub label: Option<String>,
	pub volume_id: Option<String>,
	pub lsblk_name: Option<String>,
	pub lsblk_path: Option<String>,
	pub lsblk_model: Option<String>,
	pub lsblk_serial: Option<String>,
	pub lsblk_vendor: Option<String>,
	pub lsblk_size: Option<String>,
	pub lsblk_fsver: Option<String>,
	pub lsblk_pttype: Option<String>,
	pub lsblk_ptuuid: Option<String>,
	pub lsblk_parttype: Option<String>,
	pub lsblk_partuuid: Option<String>,
	pub lsblk_parttypename: Option<String>,
	pub lsblk_wwn: Option<String>,
	pub lsblk_maj_min: Option<String>,
	pub lsblk_json: Option<String>,
}

impl MountMetadata {
	/// "Complete" per spec §4.4: has at least one of UUID/PTUUID/PARTUUID/SERIAL/WWN.
	pub fn is_complete(&self) -> bool {
		self.uuid.is_some()
			|| self.lsblk_ptuuid.is_some()
			|| self.lsblk_partuuid.is_some()
			|| self.lsblk_serial.is_some()
			|| self.lsblk_wwn.is_some()
	}
}

/// Capacity snapshot for a Volume row (spec §3).
#[derive(Debug, Clone, Default)]
pub struct CapacitySnapshot {
	pub total_bytes: u64,
	pub used_bytes: u64,
	pub free_bytes: u64,
}

/// One row per distinct volume identifier ever observed (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRow {
	pub volume_id: String,
	pub directory: String,
	pub event_count: i64,
	pub created_count: i64,
	pub modified_count: i64,
	pub deleted_count: i64,
	pub last_event_timestamp: Option<DateTime<Utc>>,
	pub usage_total_bytes: Option<i64>,
	pub usage_used_bytes: Option<i64>,
	pub usage_free_bytes: Option<i64>,
	pub usage_refreshed_at: Option<DateTime<Utc>>,
	pub events_since_refresh: i64,
	pub mount_device: Option<String>,
	pub mount_point: Option<String>,
	pub mount_uuid: Option<String>,
	pub mount_label: Option<String>,
	pub mount_volume_id: Option<String>,
	pub lsblk_name: Option<String>,
	pub lsblk_path: Option<String>,
	pub lsblk_model: Option<String>,
	pub lsblk_serial: Option<String>,
	pub lsblk_vendor: Option<String>,
	pub lsblk_size: Option<String>,
	pub lsblk_fsver: Option<String>,
	pub lsblk_pttype: Option<String>,
	pub lsblk_ptuuid: Option<String>,
	pub lsblk_parttype: Option<String>,
	pub lsblk_partuuid: Option<String>,
	pub lsblk_parttypename: Option<String>,
	pub lsblk_wwn: Option<String>,
	pub lsblk_maj_min: Option<String>,
	pub lsblk_json: Option<String>,
	pub identity_refreshed_at: Option<DateTime<Utc>>,
	pub label_index: Option<i64>,
}

/// Current cataloged state of a path on a volume (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRow {
	pub volume_id: String,
	pub path: String,
	pub directory: String,
	pub size_bytes: Option<i64>,
	pub modified_time: Option<DateTime<Utc>>,
	pub created_time: Option<DateTime<Utc>>,
	pub last_event_timestamp: Option<DateTime<Utc>>,
	pub last_event_type: Option<EventKind>,
	pub is_deleted: bool,
}

/// Kind of long-running activity a Job tracks (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
	InitialScan,
	Watcher,
}

impl JobKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobKind::InitialScan => "initial_scan",
			JobKind::Watcher => "watcher",
		}
	}
}

impl fmt::Display for JobKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// Job status vocabulary (spec §3, §4.3). `Stopping` is an intermediate the
/// watcher shutdown path uses; it is deliberately excluded from the
/// terminal set per spec §9 open question 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
	Queued,
	Running,
	Stopping,
	Complete,
	Failed,
	Interrupted,
	Stopped,
	Cancelled,
	Removed,
	Stale,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Queued => "queued",
			JobStatus::Running => "running",
			JobStatus::Stopping => "stopping",
			JobStatus::Complete => "complete",
			JobStatus::Failed => "failed",
			JobStatus::Interrupted => "interrupted",
			JobStatus::Stopped => "stopped",
			JobStatus::Cancelled => "cancelled",
			JobStatus::Removed => "removed",
			JobStatus::Stale => "stale",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		Some(match value {
			"queued" => JobStatus::Queued,
			"running" => JobStatus::Running,
			"stopping" => JobStatus::Stopping,
			"complete" => JobStatus::Complete,
			"failed" => JobStatus::Failed,
			"interrupted" => JobStatus::Interrupted,
			"stopped" => JobStatus::Stopped,
			"cancelled" => JobStatus::Cancelled,
			"removed" => JobStatus::Removed,
			"stale" => JobStatus::Stale,
			_ => return None,
		})
	}

	/// Terminal statuses per spec §4.3: {complete, failed, interrupted,
	/// cancelled, removed, stopped, stale}.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, JobStatus::Queued | JobStatus::Running | JobStatus::Stopping)
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_str())
	}
}

/// A tracked long-running activity (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
	pub job_id: String,
	pub kind: JobKind,
	pub path: Option<String>,
	pub volume_id: Option<String>,
	pub status: JobStatus,
	pub progress: Option<serde_json::Value>,
	pub owner_pid: String,
	pub owner_host: String,
	pub error_message: Option<String>,
	pub started_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregated per-path activity, read from `SummarizeFiles`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
	pub path: String,
	pub volume_id: String,
	pub directory: String,
	pub total_events: i64,
	pub first_seen: Option<DateTime<Utc>>,
	pub last_seen: Option<DateTime<Utc>>,
	pub last_event_type: Option<EventKind>,
}

/// Aggregate event counts grouped by volume, read from `SummarizeByVolume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSummary {
	pub volume_id: String,
	pub directory: String,
	pub total_events: i64,
	pub created: i64,
	pub modified: i64,
	pub deleted: i64,
	pub first_seen: Option<DateTime<Utc>>,
	pub last_seen: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn event_kind_round_trips() {
		for kind in [EventKind::Created, EventKind::Modified, EventKind::Deleted, EventKind::Existing] {
			assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
		}
	}

	#[test]
	fn stopping_is_not_terminal() {
		assert!(!JobStatus::Stopping.is_terminal());
		assert!(JobStatus::Queued.is_terminal() == false);
		assert!(JobStatus::Running.is_terminal() == false);
	}

	#[test]
	fn terminal_statuses_match_spec() {
		for status in [
			JobStatus::Complete,
			JobStatus::Failed,
			JobStatus::Interrupted,
			JobStatus::Stopped,
			JobStatus::Cancelled,
			JobStatus::Removed,
			JobStatus::Stale,
		] {
			assert!(status.is_terminal(), "{status} should be terminal");
		}
	}

	#[test]
	fn mount_metadata_completeness() {
		let mut meta = MountMetadata::default();
		assert!(!meta.is_complete());
		meta.uuid = Some("abc".into());
		assert!(meta.is_complete());
	}
}
