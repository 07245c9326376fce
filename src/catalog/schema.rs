//! Catalog schema DDL (spec §6), applied as a linear, forward-only set of
//! revisions mirroring `examples/original_source/migrations/versions/`'s
//! one-revision-per-concern shape, collapsed into a single ordered list
//! since the full schema is fixed up front rather than iteratively grown.

use rusqlite::Connection;

use super::error::CatalogResult;

pub const CURRENT_SCHEMA_VERSION: i64 = 6;

struct Revision {
	version: i64,
	statements: &'static [&'static str],
}

const REVISIONS: &[Revision] = &[
	Revision {
		version: 1,
		statements: &[
			"CREATE TABLE IF NOT EXISTS events (
				id INTEGER PRIMARY KEY AUTOINCREMENT,
				timestamp TEXT NOT NULL,
				event_type TEXT NOT NULL,
				path TEXT NOT NULL,
				directory TEXT NOT NULL,
				volume_id TEXT NOT NULL,
				process_id TEXT
			)",
			"CREATE INDEX IF NOT EXISTS idx_events_path ON events(path)",
			"CREATE INDEX IF NOT EXISTS idx_events_volume_id ON events(volume_id)",
			"CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
		],
	},
	Revision {
		version: 2,
		statements: &[
			"CREATE INDEX IF NOT EXISTS idx_events_volume_path ON events(volume_id, path)",
			"CREATE TABLE IF NOT EXISTS volumes (
				volume_id TEXT PRIMARY KEY,
				directory TEXT NOT NULL,
				event_count INTEGER DEFAULT 0,
				created_count INTEGER DEFAULT 0,
				modified_count INTEGER DEFAULT 0,
				deleted_count INTEGER DEFAULT 0,
				last_event_timestamp TEXT
			)",
			"CREATE TABLE IF NOT EXISTS files (
				volume_id TEXT NOT NULL,
				path TEXT NOT NULL,
				directory TEXT NOT NULL,
				size_bytes INTEGER,
				modified_time TEXT,
				created_time TEXT,
				last_event_timestamp TEXT,
				last_event_type TEXT,
				is_deleted INTEGER DEFAULT 0,
				PRIMARY KEY (volume_id, path)
			)",
			"CREATE INDEX IF NOT EXISTS idx_files_directory ON files(directory)",
			"CREATE INDEX IF NOT EXISTS idx_files_last_event_timestamp ON files(last_event_timestamp)",
		],
	},
	Revision {
		version: 3,
		statements: &[
			"ALTER TABLE volumes ADD COLUMN usage_total_bytes INTEGER",
			"ALTER TABLE volumes ADD COLUMN usage_used_bytes INTEGER",
			"ALTER TABLE volumes ADD COLUMN usage_free_bytes INTEGER",
			"ALTER TABLE volumes ADD COLUMN usage_refreshed_at TEXT",
			"ALTER TABLE volumes ADD COLUMN events_since_refresh INTEGER DEFAULT 0",
			"ALTER TABLE volumes ADD COLUMN mount_device TEXT",
			"ALTER TABLE volumes ADD COLUMN mount_point TEXT",
			"ALTER TABLE volumes ADD COLUMN mount_uuid TEXT",
			"ALTER TABLE volumes ADD COLUMN mount_label TEXT",
			"ALTER TABLE volumes ADD COLUMN mount_volume_id TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_name TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_path TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_model TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_serial TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_vendor TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_size TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_fsver TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_pttype TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_ptuuid TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_parttype TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_partuuid TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_parttypename TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_wwn TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_maj_min TEXT",
			"ALTER TABLE volumes ADD COLUMN lsblk_json TEXT",
			"ALTER TABLE volumes ADD COLUMN identity_refreshed_at TEXT",
		],
	},
	Revision {
		version: 4,
		statements: &[
			"CREATE TABLE IF NOT EXISTS jobs (
				job_id TEXT PRIMARY KEY,
				job_type TEXT NOT NULL,
				path TEXT,
				volume_id TEXT,
				status TEXT NOT NULL,
				progress_json TEXT,
				owner_pid TEXT,
				owner_host TEXT,
				error_message TEXT,
				started_at TEXT NOT NULL,
				updated_at TEXT NOT NULL,
				completed_at TEXT
			)",
			"CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
			"CREATE INDEX IF NOT EXISTS idx_jobs_volume_id ON jobs(volume_id)",
		],
	},
	Revision { version: 5, statements: &["ALTER TABLE volumes ADD COLUMN label_index INTEGER"] },
	Revision {
		version: 6,
		statements: &["CREATE INDEX IF NOT EXISTS idx_volumes_last_event_timestamp ON volumes(last_event_timestamp)"],
	},
];

/// Apply every revision above the schema's current `user_version` side
/// marker, in order. Idempotent: re-running against an up-to-date catalog
/// is a no-op.
pub fn migrate(conn: &Connection) -> CatalogResult<()> {
	let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
	for revision in REVISIONS {
		if revision.version <= current {
			continue;
		}
		for statement in revision.statements {
			// ALTER TABLE ADD COLUMN has no IF NOT EXISTS in sqlite; tolerate
			// a duplicate-column error so migrate() stays idempotent when run
			// twice against a catalog already at a partial revision.
			if let Err(err) = conn.execute(statement, []) {
				let msg = err.to_string();
				if !msg.contains("duplicate column name") {
					return Err(err.into());
				}
			}
		}
		conn.pragma_update(None, "user_version", revision.version)?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn migrate_reaches_current_version() {
		let conn = Connection::open_in_memory().unwrap();
		migrate(&conn).unwrap();
		let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
		assert_eq!(version, CURRENT_SCHEMA_VERSION);
	}

	#[test]
	fn migrate_is_idempotent() {
		let conn = Connection::open_in_memory().unwrap();
		migrate(&conn).unwrap();
		migrate(&conn).unwrap();
		let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap();
		assert_eq!(version, CURRENT_SCHEMA_VERSION);
	}

	#[test]
	fn tables_exist_after_migration() {
		let conn = Connection::open_in_memory().unwrap();
		migrate(&conn).unwrap();
		for table in ["events", "volumes", "files", "jobs"] {
			let count: i64 = conn
				.query_row(
					"SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
					[table],
					|row| row.get(0),
				)
				.unwrap();
			assert_eq!(count, 1, "expected table {table} to exist");
		}
	}
}
