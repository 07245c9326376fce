//! Auto-Discovery Loop: periodically attaches/detaches watchers as volumes
//! come and go (spec §4.6).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::supervisor::WatcherSupervisor;

pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);
pub const MIN_DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

pub struct AutoDiscoveryConfig {
	pub roots: Vec<PathBuf>,
	pub scan_new: bool,
	pub interval: Duration,
}

/// A running Auto-Discovery Loop. Dropping the handle does not stop the
/// loop; call `stop` for cooperative shutdown (spec §4.6: "a stop signal
/// causes it to exit at the next wake").
pub struct AutoDiscoveryHandle {
	stop_tx: watch::Sender<bool>,
	join: tokio::task::JoinHandle<()>,
}

impl AutoDiscoveryHandle {
	pub async fn stop(self) {
		let _ = self.stop_tx.send(true);
		let _ = self.join.await;
	}
}

pub struct AutoDiscoveryLoop;

impl AutoDiscoveryLoop {
	/// Prime the watcher set once before returning, then spawn the
	/// periodic loop task (spec §4.6: "a single pre-start scan_once()
	/// primes the watcher set").
	pub async fn start(supervisor: Arc<WatcherSupervisor>, config: AutoDiscoveryConfig) -> AutoDiscoveryHandle {
		let mut tracked_auto: HashSet<PathBuf> = HashSet::new();
		run_cycle(&supervisor, &config, &mut tracked_auto).await;

		let (stop_tx, mut stop_rx) = watch::channel(false);
		let join = tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = stop_rx.changed() => {
						if *stop_rx.borrow() {
							info!("auto-discovery loop stopping");
							break;
						}
					}
					_ = tokio::time::sleep(config.interval) => {
						run_cycle(&supervisor, &config, &mut tracked_auto).await;
					}
				}
			}
		});

		AutoDiscoveryHandle { stop_tx, join }
	}
}

async fn run_cycle(supervisor: &WatcherSupervisor, config: &AutoDiscoveryConfig, tracked_auto: &mut HashSet<PathBuf>) {
	let discovered = match discover_mount_points(&config.roots).await {
		Ok(set) => set,
		Err(e) => {
			error!("auto-discovery cycle failed to enumerate mount points: {e}");
			return;
		}
	};

	let currently_watched: HashSet<PathBuf> = supervisor.current_paths().await.into_iter().collect();

	let mut new_arrivals = Vec::new();
	for path in discovered.difference(&currently_watched) {
		match supervisor.add_directory(path, None).await {
			Ok(resolved) => {
				tracked_auto.insert(resolved.clone());
				new_arrivals.push(resolved);
			}
			Err(e) => error!("auto-discovery failed to add {path:?}: {e}"),
		}
	}

	if config.scan_new && !new_arrivals.is_empty() {
		let parallel = new_arrivals.len() > 1;
		if let Err(e) = supervisor.run_initial_scans(parallel, None, Some(&new_arrivals)).await {
			error!("auto-discovery initial scan batch failed: {e}");
		}
	}
	if !new_arrivals.is_empty() {
		if let Err(e) = supervisor.start_all().await {
			error!("auto-discovery failed to start live watch for new arrivals: {e}");
		}
	}

	let departed: Vec<PathBuf> = tracked_auto.difference(&discovered).cloned().collect();
	for path in departed {
		if let Err(e) = supervisor.remove_directory(&path).await {
			error!("auto-discovery failed to remove {path:?}: {e}");
		}
		tracked_auto.remove(&path);
	}
}

/// Enumerate each root's immediate child directories and retain only
/// those that are current host mount points (spec §4.6).
async fn discover_mount_points(roots: &[PathBuf]) -> std::io::Result<HashSet<PathBuf>> {
	let mounted = host_mount_points();
	let mut discovered = HashSet::new();

	for root in roots {
		let mut entries = match tokio::fs::read_dir(root).await {
			Ok(entries) => entries,
			Err(e) => {
				tracing::warn!("auto-discovery could not read {root:?}: {e}");
				continue;
			}
		};
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
				continue;
			}
			let resolved = std::fs::canonicalize(&path).unwrap_or(path);
			if mounted.contains(&resolved) {
				discovered.insert(resolved);
			}
		}
	}
	Ok(discovered)
}

#[cfg(target_os = "linux")]
fn host_mount_points() -> HashSet<PathBuf> {
	std::fs::read_to_string("/proc/mounts")
		.map(|contents| {
			contents
				.lines()
				.filter_map(|line| line.split_whitespace().nth(1))
				.map(PathBuf::from)
				.collect()
		})
		.unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn host_mount_points() -> HashSet<PathBuf> {
	HashSet::new()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn discover_mount_points_ignores_unreadable_roots() {
		let missing = PathBuf::from("/nonexistent/diskwatcher/test/root");
		let result = discover_mount_points(&[missing]).await.unwrap();
		assert!(result.is_empty());
	}
}
