//! Configuration for the catalog store, grounded on the teacher's
//! `database::config::DatabaseConfig` but trimmed to what a relational
//! catalog actually needs (spec §4.1, §5).

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the catalog's sqlite connection.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
	/// Path to the sqlite database file. `None` means an in-memory catalog
	/// (used in tests; `RunInitialScans(parallel=true)` degrades to serial
	/// mode when this is `None`, per spec §4.5).
	pub database_path: Option<PathBuf>,

	/// Busy timeout passed to sqlite (spec §4.1: 10 seconds).
	pub busy_timeout: Duration,

	/// Whether to open the connection read-only (spec §4.1: "Read-only
	/// consumers open the database in a mode that fails any attempted write").
	pub read_only: bool,
}

impl CatalogConfig {
	pub fn file(path: PathBuf) -> Self {
		Self { database_path: Some(path), busy_timeout: Duration::from_secs(10), read_only: false }
	}

	pub fn in_memory() -> Self {
		Self { database_path: None, busy_timeout: Duration::from_secs(10), read_only: false }
	}

	pub fn read_only(mut self) -> Self {
		self.read_only = true;
		self
	}
}

impl Default for CatalogConfig {
	fn default() -> Self {
		Self::in_memory()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn in_memory_has_no_path() {
		let config = CatalogConfig::in_memory();
		assert!(config.database_path.is_none());
	}

	#[test]
	fn file_config_carries_path() {
		let path = PathBuf::from("/tmp/catalog.sqlite3");
		let config = CatalogConfig::file(path.clone());
		assert_eq!(config.database_path, Some(path));
	}
}
