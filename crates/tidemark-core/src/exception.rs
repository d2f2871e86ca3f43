//! Error taxonomy
//!
//! Every failure that crosses a statement boundary ends up as one of:
//!
//! - [`SqlError`]: the closed SQL taxonomy (conflict, timeout, assertion, migration,
//!   after-commit, generic database failure)
//! - a non-SQL [`Error`] variant: cancellation, misuse of a handle, plan errors, I/O
//! - [`Error::Unrecognized`]: a driver failure the classifier did not recognize,
//!   carried unchanged

use crate::types::RowError;
use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Kind of conflict reported by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlConflict {
	/// A serializable transaction could not be serialized and must be retried.
	SerializationFailure,
	/// A unique constraint rejected the statement.
	UniqueViolation,
}

impl fmt::Display for SqlConflict {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SqlConflict::SerializationFailure => f.write_str("serialization failure"),
			SqlConflict::UniqueViolation => f.write_str("unique violation"),
		}
	}
}

/// Classified SQL failure.
#[derive(Debug, thiserror::Error)]
pub enum SqlError {
	/// Conflict with a concurrent transaction; the unit of work may be re-issued.
	#[error("SQL conflict occurred: {conflict}")]
	Conflict {
		conflict: SqlConflict,
		#[source]
		source: DriverError,
	},

	#[error("SQL timeout occurred")]
	Timeout {
		#[source]
		source: DriverError,
	},

	/// A declared expectation on the statement outcome was violated.
	#[error("{0}")]
	Assertion(String),

	/// Plan and persisted state disagree, or a migration failed its own check.
	#[error("{0}")]
	Migration(String),

	/// The transaction committed, then a post-commit callback failed.
	#[error("Post-commit callback failed")]
	AfterCommit {
		#[source]
		source: anyhow::Error,
	},

	#[error("Database failure: {source}")]
	Database {
		#[source]
		source: DriverError,
	},
}

impl SqlError {
	/// Conflict kind, if this is a conflict failure.
	pub fn conflict(&self) -> Option<SqlConflict> {
		match self {
			SqlError::Conflict { conflict, .. } => Some(*conflict),
			_ => None,
		}
	}
}

/// Crate-wide error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sql(#[from] SqlError),

	/// Cancellation was requested while the operation was suspended.
	#[error("Operation was canceled")]
	Canceled,

	#[error("{0}")]
	InvalidOperation(String),

	#[error("Already committed.")]
	AlreadyCommitted,

	#[error("Transaction is already disposed.")]
	Disposed,

	/// Driver failure the classifier did not recognize.
	#[error(transparent)]
	Unrecognized(DriverError),

	#[error(transparent)]
	Row(#[from] RowError),

	#[error("Invalid migration plan: {0}")]
	InvalidPlan(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl Error {
	/// Shortcut for building an assertion failure.
	pub fn assertion(message: impl Into<String>) -> Self {
		Error::Sql(SqlError::Assertion(message.into()))
	}

	/// Shortcut for building a migration failure.
	pub fn migration(message: impl Into<String>) -> Self {
		Error::Sql(SqlError::Migration(message.into()))
	}

	pub fn as_sql(&self) -> Option<&SqlError> {
		match self {
			Error::Sql(error) => Some(error),
			_ => None,
		}
	}

	pub fn is_canceled(&self) -> bool {
		matches!(self, Error::Canceled)
	}

	pub fn is_serialization_failure(&self) -> bool {
		self.as_sql().and_then(SqlError::conflict) == Some(SqlConflict::SerializationFailure)
	}

	pub fn is_unique_violation(&self) -> bool {
		self.as_sql().and_then(SqlError::conflict) == Some(SqlConflict::UniqueViolation)
	}
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where a driver failure originated.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DriverErrorKind {
	/// Reported by the database server; `code` is the SQLSTATE when known.
	Server { code: Option<String> },
	/// The connection or the wire protocol failed.
	Connection { timed_out: bool },
	/// Raised on the client side (decoding, column lookup, misuse of the driver).
	Client,
}

/// Native driver failure, opaque until classified.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
	kind: DriverErrorKind,
	message: String,
	transient: bool,
	#[source]
	source: Option<BoxError>,
}

impl DriverError {
	fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
			transient: false,
			source: None,
		}
	}

	/// Error reported by the server with an optional SQLSTATE.
	///
	/// # Examples
	///
	/// ```
	/// use tidemark_core::DriverError;
	///
	/// let error = DriverError::server(Some("40001".to_string()), "could not serialize access");
	/// assert_eq!(error.sql_state(), Some("40001"));
	/// assert!(!error.is_transient());
	/// ```
	pub fn server(code: Option<String>, message: impl Into<String>) -> Self {
		Self::new(DriverErrorKind::Server { code }, message)
	}

	pub fn connection(message: impl Into<String>) -> Self {
		Self::new(DriverErrorKind::Connection { timed_out: false }, message)
	}

	/// Connection-level timeout. Timeouts are transient.
	pub fn timed_out(message: impl Into<String>) -> Self {
		Self::new(DriverErrorKind::Connection { timed_out: true }, message).with_transient(true)
	}

	pub fn client(message: impl Into<String>) -> Self {
		Self::new(DriverErrorKind::Client, message)
	}

	/// Marks whether the driver considers the failure retryable.
	pub fn with_transient(mut self, transient: bool) -> Self {
		self.transient = transient;
		self
	}

	pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
		self.source = Some(Box::new(source));
		self
	}

	pub fn kind(&self) -> &DriverErrorKind {
		&self.kind
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	pub fn sql_state(&self) -> Option<&str> {
		match &self.kind {
			DriverErrorKind::Server { code } => code.as_deref(),
			_ => None,
		}
	}

	pub fn is_transient(&self) -> bool {
		self.transient
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self.kind, DriverErrorKind::Connection { timed_out: true })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(SqlConflict::SerializationFailure, true, false)]
	#[case(SqlConflict::UniqueViolation, false, true)]
	fn test_conflict_predicates(
		#[case] conflict: SqlConflict,
		#[case] serialization: bool,
		#[case] unique: bool,
	) {
		// Arrange
		let error = Error::Sql(SqlError::Conflict {
			conflict,
			source: DriverError::server(None, "conflict"),
		});

		// Act & Assert
		assert_eq!(error.is_serialization_failure(), serialization);
		assert_eq!(error.is_unique_violation(), unique);
	}

	#[rstest]
	fn test_after_commit_keeps_cause() {
		// Arrange
		let error = SqlError::AfterCommit {
			source: anyhow::anyhow!("mail queue is down"),
		};

		// Act
		let cause = std::error::Error::source(&error).map(|e| e.to_string());

		// Assert
		assert_eq!(error.to_string(), "Post-commit callback failed");
		assert_eq!(cause.as_deref(), Some("mail queue is down"));
	}

	#[rstest]
	fn test_timed_out_is_transient() {
		let error = DriverError::timed_out("connect timed out");

		assert!(error.is_transient());
		assert!(error.is_timeout());
		assert_eq!(error.sql_state(), None);
	}

	#[rstest]
	fn test_assertion_shortcut_displays_message() {
		let error = Error::assertion("Expected query to affect single row, but affected 2 rows.");

		assert!(matches!(error, Error::Sql(SqlError::Assertion(_))));
		assert_eq!(
			error.to_string(),
			"Expected query to affect single row, but affected 2 rows."
		);
	}

	#[rstest]
	fn test_row_error_converts_transparently() {
		let error: Error = RowError::ColumnNotFound("title".to_string()).into();

		assert!(matches!(error, Error::Row(RowError::ColumnNotFound(_))));
		assert_eq!(error.to_string(), "Column not found: title");
	}
}
