//! Retry mechanism for handling transient errors.
//!
//! Provides exponential backoff retry for recoverable errors, shared by the
//! catalog store (spec §4.1 "database is locked" retries) and the directory
//! watcher's backend construction (spec §4.4).

use crate::error::{DiskWatcherError, ErrorRecoveryConfig, Result};
use std::future::Future;
use tracing::{debug, warn};

/// Retry manager that handles the retry logic with exponential backoff.
#[derive(Debug, Default)]
pub struct RetryManager {
	config: ErrorRecoveryConfig,
}

impl RetryManager {
	pub fn new(config: ErrorRecoveryConfig) -> Self {
		Self { config }
	}

	/// Execute a simple async closure with retry logic.
	pub async fn execute_simple<T, F, Fut>(&self, operation_name: &str, mut operation_fn: F) -> Result<T>
	where
		F: FnMut() -> Fut + Send,
		Fut: Future<Output = Result<T>> + Send,
	{
		let mut attempt = 0;
		let start_time = std::time::Instant::now();

		loop {
			match operation_fn().await {
				Ok(result) => {
					if attempt > 0 {
						debug!(
							"operation '{}' succeeded after {} attempts in {:?}",
							operation_name,
							attempt + 1,
							start_time.elapsed()
						);
					}
					return Ok(result);
				}
				Err(error) => {
					if !error.is_retryable() {
						debug!("operation '{}' failed with non-retryable error: {}", operation_name, error);
						return Err(error);
					}

					if attempt >= self.config.max_retries {
						warn!(
							"operation '{}' failed after {} attempts over {:?}, giving up",
							operation_name,
							attempt + 1,
							start_time.elapsed()
						);
						return Err(DiskWatcherError::RecoveryFailed {
							operation: operation_name.to_string(),
							attempts: attempt + 1,
							total_duration: start_time.elapsed(),
							last_error: error.to_string(),
						});
					}

					let delay = self.config.delay_for_attempt(attempt);
					warn!(
						"operation '{}' failed (attempt {}), retrying in {:?}: {}",
						operation_name,
						attempt + 1,
						delay,
						error
					);

					tokio::time::sleep(delay).await;
					attempt += 1;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;
	use std::time::Duration;

	#[tokio::test]
	async fn retries_until_success() {
		let config = ErrorRecoveryConfig {
			max_retries: 3,
			initial_retry_delay: Duration::from_millis(1),
			exponential_backoff: false,
			..ErrorRecoveryConfig::default()
		};
		let manager = RetryManager::new(config);
		let counter = Arc::new(AtomicU32::new(0));
		let counter_clone = counter.clone();

		let result = manager
			.execute_simple("test_op", move || {
				let counter = counter_clone.clone();
				async move {
					let count = counter.fetch_add(1, Ordering::SeqCst);
					if count < 2 {
						Err(DiskWatcherError::Timeout {
							operation: "test".into(),
							timeout: Duration::from_millis(1),
						})
					} else {
						Ok(count)
					}
				}
			})
			.await;

		assert_eq!(result.unwrap(), 2);
		assert_eq!(counter.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn gives_up_after_max_retries() {
		let config = ErrorRecoveryConfig {
			max_retries: 2,
			initial_retry_delay: Duration::from_millis(1),
			..ErrorRecoveryConfig::default()
		};
		let manager = RetryManager::new(config);

		let result: Result<()> = manager
			.execute_simple("always_fails", || async {
				Err(DiskWatcherError::Timeout {
					operation: "test".into(),
					timeout: Duration::from_millis(1),
				})
			})
			.await;

		match result.unwrap_err() {
			DiskWatcherError::RecoveryFailed { attempts, .. } => assert_eq!(attempts, 3),
			other => panic!("expected RecoveryFailed, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn non_retryable_errors_stop_immediately() {
		let manager = RetryManager::new(ErrorRecoveryConfig::default());
		let result: Result<()> = manager
			.execute_simple("config_issue", || async {
				Err(DiskWatcherError::config("path", "missing"))
			})
			.await;

		assert!(matches!(result.unwrap_err(), DiskWatcherError::Config { .. }));
	}
}
