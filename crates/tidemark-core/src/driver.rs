//! Driver boundary
//!
//! A concrete database driver hands out [`NativeConnection`]s. A connection runs at
//! most one transaction at a time, executes parameterized statements with a timeout
//! and reports failures as [`DriverError`]s. Pooling, if any, lives behind the driver.

use crate::exception::DriverError;
use crate::types::{IsolationLevel, QueryValue, Row};
use async_trait::async_trait;
use std::time::Duration;

/// Source of native connections.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
	/// Opens (or checks out) a connection. Fails with a transient error when the
	/// database is unreachable for a reason worth retrying.
	async fn open_connection(
		&self,
		timeout: Duration,
	) -> Result<Box<dyn NativeConnection>, DriverError>;
}

/// One native connection.
///
/// Implementations must not leak the underlying session: dropping a connection that
/// is still inside a transaction has to roll it back or discard the session.
#[async_trait]
pub trait NativeConnection: Send {
	async fn begin_transaction(
		&mut self,
		isolation_level: IsolationLevel,
		timeout: Duration,
	) -> Result<(), DriverError>;

	/// Executes one statement and returns the number of affected rows.
	async fn execute(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Duration,
	) -> Result<u64, DriverError>;

	async fn query(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Duration,
	) -> Result<Vec<Row>, DriverError>;

	/// Executes a parameterless, possibly multi-statement, batch.
	async fn execute_batch(&mut self, sql: &str, timeout: Duration) -> Result<u64, DriverError>;

	async fn commit(&mut self, timeout: Duration) -> Result<(), DriverError>;

	async fn rollback(&mut self, timeout: Duration) -> Result<(), DriverError>;

	/// Releases the connection. An unfinished transaction is rolled back first.
	async fn close(self: Box<Self>);
}
