//! Error types for catalog operations, grounded on the teacher's
//! `database::error::DatabaseError` shape but mapped onto `rusqlite`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
	#[error("catalog initialization failed: {0}")]
	InitializationFailed(String),

	#[error("catalog connection failed: {0}")]
	ConnectionFailed(String),

	#[error("catalog is locked or busy: {0}")]
	Busy(String),

	#[error("sqlite error: {0}")]
	Sqlite(#[from] rusqlite::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("transaction failed: {0}")]
	TransactionFailed(String),

	#[error("job {0} is already in a terminal state")]
	JobTerminal(String),

	#[error("catalog is read-only")]
	ReadOnly,

	#[error("catalog database corruption detected: {0}")]
	Corruption(String),

	#[error("invalid catalog configuration: {0}")]
	InvalidConfiguration(String),
}

impl CatalogError {
	/// Whether this error indicates transient lock contention the caller
	/// should retry (spec §4.1 Concurrency and retry).
	pub fn is_retryable(&self) -> bool {
		match self {
			CatalogError::Busy(_) | CatalogError::ConnectionFailed(_) | CatalogError::TransactionFailed(_) => true,
			CatalogError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
				err.code,
				rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
			),
			_ => false,
		}
	}

	pub fn is_corruption(&self) -> bool {
		matches!(self, CatalogError::Corruption(_))
	}

	pub fn is_resource_limit(&self) -> bool {
		matches!(self, CatalogError::ReadOnly)
	}
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn busy_errors_are_retryable() {
		assert!(CatalogError::Busy("locked".into()).is_retryable());
		assert!(!CatalogError::ReadOnly.is_retryable());
	}

	#[test]
	fn corruption_is_flagged() {
		let err = CatalogError::Corruption("checksum mismatch".into());
		assert!(err.is_corruption());
		assert!(!err.is_retryable());
	}
}
