//! Error classifier
//!
//! Maps [`DriverError`]s onto the [`SqlError`] taxonomy. Call sites classify as close
//! to the statement as possible and never swallow the result.

use tidemark_core::{DriverError, DriverErrorKind, Error, SqlConflict, SqlError};

/// SQLSTATE `serialization_failure`
pub const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE `unique_violation`
pub const UNIQUE_VIOLATION: &str = "23505";

enum Verdict {
	Conflict(SqlConflict),
	Timeout,
	Database,
	Unrecognized,
}

fn verdict(error: &DriverError) -> Verdict {
	match error.kind() {
		DriverErrorKind::Server { code } => match code.as_deref() {
			Some(SERIALIZATION_FAILURE) => Verdict::Conflict(SqlConflict::SerializationFailure),
			Some(UNIQUE_VIOLATION) => Verdict::Conflict(SqlConflict::UniqueViolation),
			_ => Verdict::Database,
		},
		DriverErrorKind::Connection { timed_out: true } => Verdict::Timeout,
		DriverErrorKind::Connection { timed_out: false } => Verdict::Database,
		_ => Verdict::Unrecognized,
	}
}

/// Classifies a driver failure, handing it back unchanged when it is not recognized.
///
/// # Examples
///
/// ```
/// use tidemark_core::{DriverError, SqlConflict};
/// use tidemark_db::backends::classify::classify;
///
/// let error = DriverError::server(Some("23505".to_string()), "duplicate key value");
/// let classified = classify(error).unwrap();
/// assert_eq!(classified.conflict(), Some(SqlConflict::UniqueViolation));
///
/// let decode = DriverError::client("column \"id\" is not text");
/// assert!(classify(decode).is_err());
/// ```
pub fn classify(error: DriverError) -> Result<SqlError, DriverError> {
	match verdict(&error) {
		Verdict::Conflict(conflict) => Ok(SqlError::Conflict {
			conflict,
			source: error,
		}),
		Verdict::Timeout => Ok(SqlError::Timeout { source: error }),
		Verdict::Database => Ok(SqlError::Database { source: error }),
		Verdict::Unrecognized => Err(error),
	}
}

/// Classifies into the crate-wide error; unrecognized failures propagate as they are.
pub fn into_error(error: DriverError) -> Error {
	match classify(error) {
		Ok(classified) => Error::Sql(classified),
		Err(native) => Error::Unrecognized(native),
	}
}
