//! Notification backend construction with polling fallback (spec §4.4).
//!
//! Grounded on the teacher's `watcher::create_filesystem_watcher` /
//! `setup_watcher_callback` (notify callback wiring, `RecursiveMode`,
//! error classification), generalized from a single `RecommendedWatcher`
//! to dynamic dispatch over `RecommendedWatcher` or `PollWatcher` so a
//! watch-descriptor-exhaustion failure degrades to polling instead of
//! aborting the directory watcher.

use std::path::Path;
use std::time::Duration;

use notify::{Config, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, warn};

use crate::error::{DiskWatcherError, Result, WatcherBackendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
	Native,
	Polling,
}

/// Owns whichever concrete `notify` watcher backend construction settled
/// on; callers interact only through the `Watcher` trait object.
pub struct WatcherBackend {
	pub kind: BackendKind,
	inner: Box<dyn Watcher + Send>,
}

impl WatcherBackend {
	/// Attempt the native (kernel-native, e.g. inotify) backend first; on a
	/// construction failure that looks like watch-descriptor exhaustion,
	/// fall back to polling at `poll_interval` (spec §4.4).
	pub fn construct(
		path: &Path, poll_interval: Duration, event_tx: std::sync::mpsc::Sender<notify::Result<notify::Event>>,
	) -> Result<Self> {
		match RecommendedWatcher::new(
			{
				let tx = event_tx.clone();
				move |res| {
					let _ = tx.send(res);
				}
			},
			Config::default(),
		) {
			Ok(mut watcher) => {
				watcher
					.watch(path, RecursiveMode::Recursive)
					.map_err(|e| classify_watch_error(path, e))?;
				Ok(Self { kind: BackendKind::Native, inner: Box::new(watcher) })
			}
			Err(e) if is_watch_descriptor_exhaustion(&e) => {
				warn!("native watch backend exhausted for {path:?}, falling back to polling: {e}");
				let config = Config::default().with_poll_interval(poll_interval);
				let mut watcher = PollWatcher::new(
					move |res| {
						let _ = event_tx.send(res);
					},
					config,
				)
				.map_err(|e| DiskWatcherError::WatcherBackend(WatcherBackendError::Notify(e)))?;
				watcher
					.watch(path, RecursiveMode::Recursive)
					.map_err(|e| classify_watch_error(path, e))?;
				Ok(Self { kind: BackendKind::Polling, inner: Box::new(watcher) })
			}
			Err(e) => {
				error!("failed to construct watch backend for {path:?}: {e}");
				Err(DiskWatcherError::WatcherBackend(WatcherBackendError::Notify(e)))
			}
		}
	}

	/// Stop watching; dropping the backend also unsubscribes, this just
	/// makes the intent explicit at call sites.
	pub fn unwatch(&mut self, path: &Path) {
		let _ = self.inner.unwatch(path);
	}
}

fn is_watch_descriptor_exhaustion(err: &notify::Error) -> bool {
	match &err.kind {
		notify::ErrorKind::MaxFilesWatch => true,
		notify::ErrorKind::Io(io_err) => {
			matches!(io_err.raw_os_error(), Some(28)) // ENOSPC
				|| io_err.to_string().to_lowercase().contains("no space")
		}
		notify::ErrorKind::Generic(msg) => msg.to_lowercase().contains("no space"),
		_ => false,
	}
}

fn classify_watch_error(path: &Path, err: notify::Error) -> DiskWatcherError {
	if is_watch_descriptor_exhaustion(&err) {
		DiskWatcherError::WatcherBackend(WatcherBackendError::WatchDescriptorExhausted(
			path.to_string_lossy().into_owned(),
		))
	} else {
		DiskWatcherError::WatcherBackend(WatcherBackendError::Notify(err))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn enospc_io_error_is_exhaustion() {
		let io_err = std::io::Error::from_raw_os_error(28);
		let err = notify::Error::new(notify::ErrorKind::Io(io_err));
		assert!(is_watch_descriptor_exhaustion(&err));
	}

	#[test]
	fn unrelated_io_error_is_not_exhaustion() {
		let io_err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
		let err = notify::Error::new(notify::ErrorKind::Io(io_err));
		assert!(!is_watch_descriptor_exhaustion(&err));
	}
}
