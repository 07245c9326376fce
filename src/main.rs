use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use diskwatcher::catalog::{CatalogConfig, CatalogStore};
use diskwatcher::mount_probe::{LsblkMountProbe, MountProbe};
use diskwatcher::supervisor::WatcherSupervisor;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "diskwatcher")]
#[command(about = "Catalogs filesystem activity across mounted volumes")]
struct Cli {
	/// Override the catalog database path
	#[arg(long, global = true)]
	db: Option<PathBuf>,

	/// Enable debug logging regardless of log.level
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the watcher: scan then watch every configured/discovered directory
	Run {
		/// Root directories to watch (in addition to any auto-discovery roots)
		paths: Vec<PathBuf>,
		/// Skip the initial archival scan
		#[arg(long)]
		no_scan: bool,
		/// Enable auto-discovery of newly mounted volumes under these roots
		#[arg(long)]
		auto_discover: Vec<PathBuf>,
	},
	/// Show every tracked job and its status
	Status,
	/// Stream recent events, optionally following new ones
	Stream {
		#[arg(short = 'n', long, default_value_t = 50)]
		limit: i64,
		#[arg(short, long)]
		follow: bool,
	},
	/// Search cataloged files
	Search {
		#[arg(long, default_value_t = 100)]
		limit: i64,
	},
	/// Summarize cataloged volumes
	Volumes,
	/// Manage local configuration
	Config {
		#[command(subcommand)]
		action: ConfigAction,
	},
	/// Maintenance utilities
	Dev {
		#[command(subcommand)]
		action: DevAction,
	},
	/// Not implemented in this repository: the HTTP dashboard
	Dashboard,
	/// Not implemented in this repository: volume label management
	Labels,
	/// Not implemented in this repository: label suggestion export
	Suggest,
}

#[derive(Subcommand)]
enum ConfigAction {
	/// List every known key with its effective value and source
	Show,
	/// Set a key's value
	Set { key: String, value: String },
	/// Remove a user override, reverting to the default
	Unset { key: String },
	/// Print the resolved config file path
	Path,
}

#[derive(Subcommand)]
enum DevAction {
	/// Print the current schema revision
	Revision,
	/// Run SQLite's `VACUUM`
	Vacuum,
	/// Run SQLite's `PRAGMA integrity_check`
	Integrity,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_logging(cli.verbose);

	match cli.command {
		Commands::Run { paths, no_scan, auto_discover } => run(cli.db, paths, no_scan, auto_discover).await,
		Commands::Status => status(cli.db).await,
		Commands::Stream { limit, follow } => stream(cli.db, limit, follow).await,
		Commands::Search { limit } => search(cli.db, limit).await,
		Commands::Volumes => volumes(cli.db).await,
		Commands::Config { action } => config_command(action),
		Commands::Dev { action } => dev_command(cli.db, action).await,
		Commands::Dashboard | Commands::Labels | Commands::Suggest => {
			Err(diskwatcher::DiskWatcherError::config("command", "not available in this build").into())
		}
	}
}

fn init_logging(verbose: bool) {
	let level = if verbose {
		Level::DEBUG
	} else {
		match diskwatcher::config::get_log_level().as_str() {
			"debug" => Level::DEBUG,
			"warning" => Level::WARN,
			"error" | "critical" => Level::ERROR,
			_ => Level::INFO,
		}
	};
	tracing_subscriber::fmt().with_max_level(level).init();
}

fn open_catalog(db_override: Option<PathBuf>) -> anyhow::Result<CatalogStore> {
	let path = db_override.unwrap_or_else(diskwatcher::default_catalog_path);
	Ok(CatalogStore::open(CatalogConfig::file(path))?)
}

async fn run(db: Option<PathBuf>, mut paths: Vec<PathBuf>, no_scan: bool, auto_discover_roots: Vec<PathBuf>) -> anyhow::Result<()> {
	let store = open_catalog(db)?;
	let supervisor = Arc::new(
		WatcherSupervisor::new(store.clone(), Arc::new(LsblkMountProbe) as Arc<dyn MountProbe>, diskwatcher::config::get_exclude_patterns())
			.with_poll_interval(std::time::Duration::from_secs(diskwatcher::config::get_polling_interval())),
	);

	let stale = supervisor.cleanup_stale_jobs().await?;
	if stale > 0 {
		info!("marked {stale} stale job(s) from a previous run");
	}

	if paths.is_empty() {
		paths = diskwatcher::config::get_auto_discover_roots();
	}
	for path in &paths {
		supervisor.add_directory(path, None).await?;
	}

	if !no_scan && diskwatcher::config::get_auto_scan() {
		let max_workers = diskwatcher::config::get_max_scan_workers();
		supervisor.run_initial_scans(paths.len() > 1, max_workers, None).await?;
	}
	supervisor.start_all().await?;

	let mut discovery_handle = None;
	let discovery_roots: Vec<PathBuf> = auto_discover_roots.into_iter().chain(diskwatcher::config::get_auto_discover_roots()).collect();
	if !discovery_roots.is_empty() {
		let config = diskwatcher::AutoDiscoveryConfig {
			roots: discovery_roots,
			scan_new: diskwatcher::config::get_auto_scan(),
			interval: diskwatcher::discovery::DEFAULT_DISCOVERY_INTERVAL,
		};
		discovery_handle = Some(diskwatcher::AutoDiscoveryLoop::start(supervisor.clone(), config).await);
	}

	info!("diskwatcher running, press ctrl-c to stop");
	tokio::signal::ctrl_c().await?;
	info!("shutting down");

	if let Some(handle) = discovery_handle {
		handle.stop().await;
	}
	supervisor.stop_all().await;
	Ok(())
}

async fn status(db: Option<PathBuf>) -> anyhow::Result<()> {
	let store = open_catalog(db)?;
	let jobs = store.fetch_jobs(true, None).await?;
	for job in jobs {
		println!("{}\t{}\t{}\t{:?}", job.job_id, job.kind, job.status, job.path);
	}
	Ok(())
}

async fn stream(db: Option<PathBuf>, limit: i64, follow: bool) -> anyhow::Result<()> {
	let store = open_catalog(db)?;
	let mut last_id = 0;
	let events = store.query_events(limit).await?;
	for event in events.iter().rev() {
		println!("{}\t{}\t{}\t{}", event.timestamp, event.kind, event.volume_id, event.path);
		last_id = last_id.max(event.id);
	}

	if !follow {
		return Ok(());
	}
	loop {
		tokio::time::sleep(std::time::Duration::from_secs(1)).await;
		let events = store.query_events_since(last_id, 1000).await?;
		for event in &events {
			println!("{}\t{}\t{}\t{}", event.timestamp, event.kind, event.volume_id, event.path);
			last_id = last_id.max(event.id);
		}
	}
}

async fn search(db: Option<PathBuf>, limit: i64) -> anyhow::Result<()> {
	let store = open_catalog(db)?;
	let files = store.summarize_files(limit).await?;
	for file in files {
		println!("{}\t{}\t{}\t{:?}", file.volume_id, file.path, file.total_events, file.last_event_type);
	}
	Ok(())
}

async fn volumes(db: Option<PathBuf>) -> anyhow::Result<()> {
	let store = open_catalog(db)?;
	let volumes = store.fetch_volume_metadata().await?;
	for volume in volumes {
		println!(
			"{}\t{}\tevents={}\tused={:?}/{:?}",
			volume.volume_id, volume.directory, volume.event_count, volume.usage_used_bytes, volume.usage_total_bytes
		);
	}
	Ok(())
}

fn config_command(action: ConfigAction) -> anyhow::Result<()> {
	match action {
		ConfigAction::Show => {
			for entry in diskwatcher::config::list_config()? {
				println!("{}\t{}\t(default: {}, source: {})", entry.key, entry.value, entry.default, entry.source);
			}
		}
		ConfigAction::Set { key, value } => {
			let parsed = diskwatcher::config::set_value(&key, &value)?;
			println!("{key} = {parsed}");
		}
		ConfigAction::Unset { key } => diskwatcher::config::unset_value(&key)?,
		ConfigAction::Path => println!("{}", diskwatcher::config::config_path().display()),
	}
	Ok(())
}

async fn dev_command(db: Option<PathBuf>, action: DevAction) -> anyhow::Result<()> {
	let store = open_catalog(db)?;
	match action {
		DevAction::Revision => println!("{}", diskwatcher::catalog::CURRENT_SCHEMA_VERSION),
		DevAction::Vacuum => store.vacuum().await?,
		DevAction::Integrity => {
			let ok = store.integrity_check().await?;
			println!("{}", if ok { "ok" } else { "corrupt" });
		}
	}
	Ok(())
}
