//! Mount-identity probing (spec §4.2).
//!
//! Grounded on `examples/original_source/src/diskwatcher/utils/devices.py`'s
//! `get_mount_info`: shell out to `findmnt` to resolve the mount point and
//! backing device, then to `lsblk -P` for the richer block-device
//! attribute set. Subprocess plumbing follows the teacher's
//! `tokio::process::Command` + timeout pattern used elsewhere for external
//! tool invocations.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::catalog::MountMetadata;
use crate::error::{DiskWatcherError, Result};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved mount identity for a directory (spec §4.2).
#[derive(Debug, Clone)]
pub struct MountInfo {
	pub directory: String,
	pub mount_point: String,
	pub device: String,
	pub volume_id: String,
	pub metadata: MountMetadata,
}

/// Probes host tooling (`findmnt`, `lsblk`) to identify the volume backing
/// a directory. Implementations are expected to fall back rather than
/// propagate host-tool absence; `probe` only returns `Err` for genuine
/// timeouts or I/O failures invoking the tools.
#[async_trait::async_trait]
pub trait MountProbe: Send + Sync {
	async fn probe(&self, directory: &Path) -> Result<MountInfo>;
}

/// Linux probe backed by `findmnt` and `lsblk`.
pub struct LsblkMountProbe;

#[async_trait::async_trait]
impl MountProbe for LsblkMountProbe {
	async fn probe(&self, directory: &Path) -> Result<MountInfo> {
		let resolved = std::fs::canonicalize(directory).unwrap_or_else(|_| directory.to_path_buf());
		let directory_str = resolved.to_string_lossy().into_owned();

		let mount_point = match run_capture("findmnt", &["--noheadings", "--output", "TARGET", "--target", &directory_str]).await {
			Ok(out) => out,
			Err(_) => return Ok(fallback_mount_info(&directory_str)),
		};
		let device = match run_capture("findmnt", &["--noheadings", "--output", "SOURCE", "--target", &mount_point]).await {
			Ok(out) => out,
			Err(_) => return Ok(fallback_mount_info(&directory_str)),
		};

		let device_name = Path::new(&device).file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();

		let lsblk_fields = match run_capture(
			"lsblk",
			&[
				"-P",
				"-o",
				"NAME,PATH,MODEL,SERIAL,VENDOR,SIZE,FSVER,PTTYPE,PTUUID,PARTTYPE,PARTUUID,PARTTYPENAME,WWN,UUID,LABEL,MAJ:MIN",
			],
		)
		.await
		{
			Ok(out) => find_device_fields(&out, &device_name),
			Err(_) => None,
		};

		let metadata = build_metadata(&device, &mount_point, lsblk_fields.as_ref());
		let volume_id = composite_volume_id(&metadata).unwrap_or_else(|| directory_str.clone());

		Ok(MountInfo { directory: directory_str, mount_point, device, volume_id, metadata })
	}
}

/// Used on non-Linux hosts or in tests: always returns a path-anchored
/// fallback identity without shelling out (spec §4.2 fallback behavior).
pub struct FallbackMountProbe;

#[async_trait::async_trait]
impl MountProbe for FallbackMountProbe {
	async fn probe(&self, directory: &Path) -> Result<MountInfo> {
		let resolved = std::fs::canonicalize(directory).unwrap_or_else(|_| directory.to_path_buf());
		Ok(fallback_mount_info(&resolved.to_string_lossy()))
	}
}

fn fallback_mount_info(directory: &str) -> MountInfo {
	MountInfo {
		directory: directory.to_string(),
		mount_point: directory.to_string(),
		device: directory.to_string(),
		volume_id: directory.to_string(),
		metadata: MountMetadata::default(),
	}
}

async fn run_capture(program: &str, args: &[&str]) -> Result<String> {
	let fut = Command::new(program).args(args).output();
	let output = timeout(COMMAND_TIMEOUT, fut)
		.await
		.map_err(|_| DiskWatcherError::mount_probe(args.join(" "), format!("{program} timed out after {COMMAND_TIMEOUT:?}")))?
		.map_err(|e| DiskWatcherError::mount_probe(args.join(" "), e.to_string()))?;

	if !output.status.success() {
		return Err(DiskWatcherError::mount_probe(args.join(" "), format!("{program} exited with {}", output.status)));
	}
	Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Parse `lsblk -P` output (`KEY="value" KEY2="value2" ...` per line) and
/// return the fields for the line whose `NAME` matches `device_name`.
fn find_device_fields(output: &str, device_name: &str) -> Option<HashMap<String, String>> {
	for line in output.lines() {
		let fields = parse_pairs_line(line);
		if fields.get("NAME").map(|s| s.as_str()) == Some(device_name) {
			return Some(fields);
		}
	}
	None
}

fn parse_pairs_line(line: &str) -> HashMap<String, String> {
	let mut fields = HashMap::new();
	let mut rest = line;
	while let Some(eq) = rest.find('=') {
		let key = rest[..eq].trim().to_string();
		rest = &rest[eq + 1..];
		if !rest.starts_with('"') {
			break;
		}
		rest = &rest[1..];
		match rest.find('"') {
			Some(end) => {
				fields.insert(key, rest[..end].to_string());
				rest = rest[end + 1..].trim_start();
			}
			None => break,
		}
	}
	fields
}

fn non_empty(fields: &HashMap<String, String>, key: &str) -> Option<String> {
	fields.get(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn build_metadata(device: &str, mount_point: &str, fields: Option<&HashMap<String, String>>) -> MountMetadata {
	let mut metadata = MountMetadata {
		device: Some(device.to_string()),
		mount_point: Some(mount_point.to_string()),
		..Default::default()
	};

	let Some(fields) = fields else { return metadata };

	metadata.uuid = non_empty(fields, "UUID");
	metadata.label = non_empty(fields, "LABEL");
	metadata.lsblk_name = non_empty(fields, "NAME");
	metadata.lsblk_path = non_empty(fields, "PATH");
	metadata.lsblk_model = non_empty(fields, "MODEL");
	metadata.lsblk_serial = non_empty(fields, "SERIAL");
	metadata.lsblk_vendor = non_empty(fields, "VENDOR");
	metadata.lsblk_size = non_empty(fields, "SIZE");
	metadata.lsblk_fsver = non_empty(fields, "FSVER");
	metadata.lsblk_pttype = non_empty(fields, "PTTYPE");
	metadata.lsblk_ptuuid = non_empty(fields, "PTUUID");
	metadata.lsblk_parttype = non_empty(fields, "PARTTYPE");
	metadata.lsblk_partuuid = non_empty(fields, "PARTUUID");
	metadata.lsblk_parttypename = non_empty(fields, "PARTTYPENAME");
	metadata.lsblk_wwn = non_empty(fields, "WWN");
	metadata.lsblk_maj_min = non_empty(fields, "MAJ:MIN");
	metadata.lsblk_json = serde_json::to_string(fields).ok();

	metadata
}

/// Pipe-joined lower-case `key=value` composite (spec §4.2), priority order
/// {UUID, PARTUUID, PTUUID, WWN, SERIAL, MODEL, VENDOR, FSVER}. Returns
/// `None` when no attribute in that list is present, signaling the caller
/// should fall back to the directory path.
fn composite_volume_id(metadata: &MountMetadata) -> Option<String> {
	let candidates: &[(&str, &Option<String>)] = &[
		("uuid", &metadata.uuid),
		("partuuid", &metadata.lsblk_partuuid),
		("ptuuid", &metadata.lsblk_ptuuid),
		("wwn", &metadata.lsblk_wwn),
		("serial", &metadata.lsblk_serial),
		("model", &metadata.lsblk_model),
		("vendor", &metadata.lsblk_vendor),
		("fsver", &metadata.lsblk_fsver),
	];

	let parts: Vec<String> = candidates
		.iter()
		.filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={}", v.to_lowercase())))
		.collect();

	if parts.is_empty() {
		None
	} else {
		Some(parts.join("|"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_lsblk_pairs_line() {
		let line = r#"NAME="sda1" UUID="abc-123" LABEL="DATA" MODEL="Samsung SSD""#;
		let fields = parse_pairs_line(line);
		assert_eq!(fields.get("NAME"), Some(&"sda1".to_string()));
		assert_eq!(fields.get("UUID"), Some(&"abc-123".to_string()));
		assert_eq!(fields.get("MODEL"), Some(&"Samsung SSD".to_string()));
	}

	#[test]
	fn composite_volume_id_follows_priority_order() {
		let metadata = MountMetadata {
			uuid: Some("ABC-123".into()),
			lsblk_serial: Some("XYZ".into()),
			..Default::default()
		};
		assert_eq!(composite_volume_id(&metadata), Some("uuid=abc-123".to_string()));
	}

	#[test]
	fn composite_volume_id_omits_missing_keys() {
		let metadata = MountMetadata { lsblk_serial: Some("XYZ".into()), lsblk_model: Some("Model".into()), ..Default::default() };
		assert_eq!(composite_volume_id(&metadata), Some("serial=xyz|model=model".to_string()));
	}

	#[test]
	fn composite_volume_id_none_when_no_attributes_present() {
		assert_eq!(composite_volume_id(&MountMetadata::default()), None);
	}

	#[tokio::test]
	async fn fallback_probe_uses_directory_as_volume_id() {
		let dir = tempfile::tempdir().unwrap();
		let info = FallbackMountProbe.probe(dir.path()).await.unwrap();
		let resolved = std::fs::canonicalize(dir.path()).unwrap();
		assert_eq!(info.volume_id, resolved.to_string_lossy());
	}
}
