//! Crate-wide error taxonomy.
//!
//! Kinds mirror spec §7: `CatalogWriteError`, `CatalogReadError`,
//! `MountProbeError`, `WatcherBackendError` (with `WatchDescriptorExhausted`
//! as a sub-case), `ScanError`, `JobStateError`, `ConfigError`.

use std::time::Duration;
use thiserror::Error;

use crate::catalog::CatalogError;

#[derive(Error, Debug)]
pub enum WatcherBackendError {
	#[error("watch descriptor pool exhausted: {0}")]
	WatchDescriptorExhausted(String),

	#[error("notify backend error: {0}")]
	Notify(#[from] notify::Error),
}

#[derive(Error, Debug)]
pub enum DiskWatcherError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON serialization error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("invalid path: {path}")]
	InvalidPath { path: String },

	#[error("catalog write failed: {0}")]
	CatalogWrite(#[source] CatalogError),

	#[error("catalog read failed: {0}")]
	CatalogRead(#[source] CatalogError),

	#[error("mount probe failed for {directory}: {reason}")]
	MountProbe { directory: String, reason: String },

	#[error("watcher backend error: {0}")]
	WatcherBackend(#[from] WatcherBackendError),

	#[error("scan error on {path}: {reason}")]
	Scan { path: String, reason: String },

	#[error("job state error: {0}")]
	JobState(String),

	#[error("configuration error: {parameter} - {reason}")]
	Config { parameter: String, reason: String },

	#[error("operation timeout: {operation} exceeded {timeout:?}")]
	Timeout { operation: String, timeout: Duration },

	#[error("recovery failed: {operation} after {attempts} attempts over {total_duration:?} - {last_error}")]
	RecoveryFailed {
		operation: String,
		attempts: u32,
		total_duration: Duration,
		last_error: String,
	},
}

impl DiskWatcherError {
	/// Whether the failing operation should be retried by a `RetryManager`.
	pub fn is_retryable(&self) -> bool {
		match self {
			DiskWatcherError::Io(io_err) => matches!(
				io_err.kind(),
				std::io::ErrorKind::TimedOut
					| std::io::ErrorKind::Interrupted
					| std::io::ErrorKind::WouldBlock
			),
			DiskWatcherError::CatalogWrite(e) | DiskWatcherError::CatalogRead(e) => e.is_retryable(),
			DiskWatcherError::Timeout { .. } => true,
			DiskWatcherError::WatcherBackend(_) => false,
			_ => false,
		}
	}

	pub fn category(&self) -> &'static str {
		match self {
			DiskWatcherError::Io(_) => "io",
			DiskWatcherError::Json(_) => "serialization",
			DiskWatcherError::InvalidPath { .. } => "configuration",
			DiskWatcherError::CatalogWrite(_) => "catalog_write",
			DiskWatcherError::CatalogRead(_) => "catalog_read",
			DiskWatcherError::MountProbe { .. } => "mount_probe",
			DiskWatcherError::WatcherBackend(_) => "watcher_backend",
			DiskWatcherError::Scan { .. } => "scan",
			DiskWatcherError::JobState(_) => "job_state",
			DiskWatcherError::Config { .. } => "configuration",
			DiskWatcherError::Timeout { .. } => "timeout",
			DiskWatcherError::RecoveryFailed { .. } => "recovery",
		}
	}

	pub fn config(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
		DiskWatcherError::Config { parameter: parameter.into(), reason: reason.into() }
	}

	pub fn scan(path: impl Into<String>, reason: impl Into<String>) -> Self {
		DiskWatcherError::Scan { path: path.into(), reason: reason.into() }
	}

	pub fn mount_probe(directory: impl Into<String>, reason: impl Into<String>) -> Self {
		DiskWatcherError::MountProbe { directory: directory.into(), reason: reason.into() }
	}
}

impl From<CatalogError> for DiskWatcherError {
	fn from(err: CatalogError) -> Self {
		DiskWatcherError::CatalogWrite(err)
	}
}

/// Error recovery configuration shared by every `RetryManager` user.
#[derive(Debug, Clone)]
pub struct ErrorRecoveryConfig {
	pub max_retries: u32,
	pub initial_retry_delay: Duration,
	pub max_retry_delay: Duration,
	pub backoff_multiplier: f64,
	pub exponential_backoff: bool,
}

impl Default for ErrorRecoveryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_retry_delay: Duration::from_millis(50),
			max_retry_delay: Duration::from_secs(30),
			backoff_multiplier: 2.0,
			exponential_backoff: true,
		}
	}
}

impl ErrorRecoveryConfig {
	/// Catalog write retry policy from spec §4.1: base 50ms, doubling, 3 attempts.
	pub fn catalog_write_policy() -> Self {
		Self {
			max_retries: 3,
			initial_retry_delay: Duration::from_millis(50),
			max_retry_delay: Duration::from_millis(50 * 2u64.pow(3)),
			backoff_multiplier: 2.0,
			exponential_backoff: true,
		}
	}

	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		if !self.exponential_backoff {
			return self.initial_retry_delay;
		}
		let delay_ms =
			self.initial_retry_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
		let delay = Duration::from_millis(delay_ms as u64);
		std::cmp::min(delay, self.max_retry_delay)
	}
}

pub type Result<T> = std::result::Result<T, DiskWatcherError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn catalog_write_policy_matches_spec() {
		let config = ErrorRecoveryConfig::catalog_write_policy();
		assert_eq!(config.max_retries, 3);
		assert_eq!(config.delay_for_attempt(0), Duration::from_millis(50));
		assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
		assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
	}

	#[test]
	fn retryable_errors_are_flagged() {
		let timeout = DiskWatcherError::Timeout {
			operation: "probe".into(),
			timeout: Duration::from_secs(5),
		};
		assert!(timeout.is_retryable());
		assert_eq!(timeout.category(), "timeout");

		let config_err = DiskWatcherError::config("path", "does not exist");
		assert!(!config_err.is_retryable());
		assert_eq!(config_err.category(), "configuration");
	}
}
