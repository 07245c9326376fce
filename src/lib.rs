pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod jobs;
pub mod mount_probe;
pub mod progress;
pub mod retry;
pub mod supervisor;
pub mod watcher;

pub use catalog::{CatalogConfig, CatalogStore, EventKind, JobKind, JobRow, JobStatus, VolumeRow};
pub use discovery::{AutoDiscoveryConfig, AutoDiscoveryHandle, AutoDiscoveryLoop};
pub use error::{DiskWatcherError, Result};
pub use jobs::JobHandle;
pub use mount_probe::{FallbackMountProbe, LsblkMountProbe, MountInfo, MountProbe};
pub use progress::{BatchMonitor, ProgressMonitor, ProgressSnapshot};
pub use supervisor::{WatcherStatus, WatcherSupervisor};
pub use watcher::{DirectoryWatcher, DirectoryWatcherConfig, DirectoryWatcherHandle, WatcherState};

/// Default catalog filename under the config directory, matching the
/// original implementation's `db/connection.py` (`DB_PATH = DB_DIR /
/// "diskwatcher.db"`).
pub const DEFAULT_CATALOG_FILENAME: &str = "diskwatcher.db";

pub fn default_catalog_path() -> std::path::PathBuf {
	config::config_dir().join(DEFAULT_CATALOG_FILENAME)
}
