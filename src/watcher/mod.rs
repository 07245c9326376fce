//! Directory Watcher: one directory's initial scan plus live event stream
//! (spec §4.4).

mod backend;
mod directory_watcher;
mod scan;

pub use backend::{BackendKind, WatcherBackend};
pub use directory_watcher::{DirectoryWatcher, DirectoryWatcherConfig, DirectoryWatcherHandle, WatcherState};
pub use scan::{ScanOutcome, ScanProgress};

use std::time::Duration;

/// Live-watch polling fallback interval bounds (spec §4.4): default 30s,
/// minimum 1s.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Mount metadata reprobe backoff (spec §4.4): first retry at 300s,
/// doubling up to a 3600s ceiling.
pub const MOUNT_REPROBE_INITIAL: Duration = Duration::from_secs(300);
pub const MOUNT_REPROBE_MAX: Duration = Duration::from_secs(3600);

/// Progress heartbeat cadence during the initial scan (spec §4.4): every
/// 500 files.
pub const SCAN_PROGRESS_INTERVAL_FILES: u64 = 500;

/// Idle heartbeat cadence for a live watcher's job row (spec §4.4).
pub const WATCHER_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
