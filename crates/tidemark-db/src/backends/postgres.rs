//! PostgreSQL driver built on a sqlx pool
//!
//! Transactions are driven with explicit `BEGIN`/`COMMIT`/`ROLLBACK` statements on a
//! checked-out pool connection, so the connection can be handed around as a
//! [`NativeConnection`] without borrowing the pool.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::{Column, Postgres, Row as _, ValueRef};
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tidemark_core::{
	DatabaseDriver, DriverError, DriverErrorKind, IsolationLevel, NativeConnection, QueryValue,
	Row,
};
use tracing::warn;
use uuid::Uuid;

/// SQLSTATEs worth another attempt to begin a transaction.
const TRANSIENT_SQL_STATES: &[&str] = &[
	"53300", // too_many_connections
	"57P01", // admin_shutdown
	"57P03", // cannot_connect_now
];

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// [`DatabaseDriver`] backed by a PostgreSQL pool.
#[derive(Clone, Debug)]
pub struct PostgresDriver {
	pool: PgPool,
}

impl PostgresDriver {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
	async fn open_connection(
		&self,
		timeout: Duration,
	) -> Result<Box<dyn NativeConnection>, DriverError> {
		let connection = match tokio::time::timeout(timeout, self.pool.acquire()).await {
			Ok(acquired) => acquired.map_err(driver_error)?,
			Err(_) => {
				return Err(DriverError::timed_out(format!(
					"Opening connection exceeded timeout of {:?}",
					timeout
				)));
			}
		};
		Ok(Box::new(PostgresConnection::new(connection, timeout)))
	}
}

/// Pool connection with at most one open transaction.
pub struct PostgresConnection {
	connection: Option<PoolConnection<Postgres>>,
	in_transaction: bool,
	/// Set after a timeout or a connection failure; the session is discarded instead
	/// of being returned to the pool.
	broken: bool,
	release_timeout: Duration,
}

impl PostgresConnection {
	fn new(connection: PoolConnection<Postgres>, release_timeout: Duration) -> Self {
		Self {
			connection: Some(connection),
			in_transaction: false,
			broken: false,
			release_timeout,
		}
	}

	fn bind_value<'q>(query: PgQuery<'q>, value: &'q QueryValue) -> PgQuery<'q> {
		match value {
			QueryValue::Null => query.bind(None::<i32>),
			QueryValue::Bool(b) => query.bind(b),
			QueryValue::Int(i) => query.bind(i),
			QueryValue::Float(f) => query.bind(f),
			QueryValue::String(s) => query.bind(s),
			QueryValue::Bytes(b) => query.bind(b),
			QueryValue::Timestamp(dt) => query.bind(dt),
			QueryValue::Uuid(u) => query.bind(u),
		}
	}

	fn build_query<'q>(sql: &'q str, params: &'q [QueryValue]) -> PgQuery<'q> {
		params
			.iter()
			.fold(sqlx::query(sql), |query, param| Self::bind_value(query, param))
	}

	fn convert_row(pg_row: &PgRow) -> Result<Row, DriverError> {
		use rust_decimal::prelude::ToPrimitive;

		let mut row = Row::new();
		for (index, column) in pg_row.columns().iter().enumerate() {
			let column_name = column.name();
			let is_null = pg_row
				.try_get_raw(index)
				.map_err(driver_error)?
				.is_null();

			let value = if is_null {
				QueryValue::Null
			} else if let Ok(value) = pg_row.try_get::<Uuid, _>(index) {
				QueryValue::Uuid(value)
			} else if let Ok(value) = pg_row.try_get::<bool, _>(index) {
				QueryValue::Bool(value)
			} else if let Ok(value) = pg_row.try_get::<i64, _>(index) {
				QueryValue::Int(value)
			} else if let Ok(value) = pg_row.try_get::<i32, _>(index) {
				QueryValue::Int(value as i64)
			} else if let Ok(value) = pg_row.try_get::<i16, _>(index) {
				QueryValue::Int(value as i64)
			} else if let Ok(value) = pg_row.try_get::<rust_decimal::Decimal, _>(index) {
				match value.to_f64() {
					Some(f) => QueryValue::Float(f),
					None => {
						return Err(DriverError::client(format!(
							"Numeric value of column '{}' is out of range",
							column_name
						)));
					}
				}
			} else if let Ok(value) = pg_row.try_get::<f64, _>(index) {
				QueryValue::Float(value)
			} else if let Ok(value) = pg_row.try_get::<String, _>(index) {
				QueryValue::String(value)
			} else if let Ok(value) = pg_row.try_get::<Vec<u8>, _>(index) {
				QueryValue::Bytes(value)
			} else if let Ok(value) = pg_row.try_get::<chrono::NaiveDateTime, _>(index) {
				QueryValue::Timestamp(chrono::DateTime::from_naive_utc_and_offset(
					value,
					chrono::Utc,
				))
			} else if let Ok(value) = pg_row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
				QueryValue::Timestamp(value)
			} else {
				return Err(DriverError::client(format!(
					"Unsupported type of column '{}'",
					column_name
				)));
			};
			row.insert(column_name, value);
		}
		Ok(row)
	}
}

fn not_connected() -> DriverError {
	DriverError::client("Connection is already released")
}

/// Awaits `future` under `timeout`, flagging the session as broken when it fails
/// at the connection level.
async fn bounded<T>(
	broken: &mut bool,
	timeout: Duration,
	future: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, DriverError> {
	match tokio::time::timeout(timeout, future).await {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(e)) => {
			let error = driver_error(e);
			if matches!(error.kind(), DriverErrorKind::Connection { .. }) {
				*broken = true;
			}
			Err(error)
		}
		Err(_) => {
			*broken = true;
			Err(DriverError::timed_out(format!(
				"Statement exceeded timeout of {:?}",
				timeout
			)))
		}
	}
}

#[async_trait]
impl NativeConnection for PostgresConnection {
	async fn begin_transaction(
		&mut self,
		isolation_level: IsolationLevel,
		timeout: Duration,
	) -> Result<(), DriverError> {
		let connection = self.connection.as_mut().ok_or_else(not_connected)?;
		let sql = format!("BEGIN ISOLATION LEVEL {}", isolation_level.to_sql());
		bounded(
			&mut self.broken,
			timeout,
			sqlx::Executor::execute(&mut **connection, sql.as_str()),
		)
		.await?;
		self.in_transaction = true;
		Ok(())
	}

	async fn execute(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Duration,
	) -> Result<u64, DriverError> {
		let connection = self.connection.as_mut().ok_or_else(not_connected)?;
		let result = bounded(
			&mut self.broken,
			timeout,
			Self::build_query(sql, params).execute(&mut **connection),
		)
		.await?;
		Ok(result.rows_affected())
	}

	async fn query(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Duration,
	) -> Result<Vec<Row>, DriverError> {
		let connection = self.connection.as_mut().ok_or_else(not_connected)?;
		let rows = bounded(
			&mut self.broken,
			timeout,
			Self::build_query(sql, params).fetch_all(&mut **connection),
		)
		.await?;
		rows.iter().map(Self::convert_row).collect()
	}

	async fn execute_batch(&mut self, sql: &str, timeout: Duration) -> Result<u64, DriverError> {
		let connection = self.connection.as_mut().ok_or_else(not_connected)?;
		let result = bounded(
			&mut self.broken,
			timeout,
			sqlx::Executor::execute(&mut **connection, sql),
		)
		.await?;
		Ok(result.rows_affected())
	}

	async fn commit(&mut self, timeout: Duration) -> Result<(), DriverError> {
		let connection = self.connection.as_mut().ok_or_else(not_connected)?;
		let result = bounded(
			&mut self.broken,
			timeout,
			sqlx::Executor::execute(&mut **connection, "COMMIT"),
		)
		.await;
		// A failed COMMIT still ends the transaction block on the server.
		self.in_transaction = false;
		result.map(|_| ())
	}

	async fn rollback(&mut self, timeout: Duration) -> Result<(), DriverError> {
		let connection = self.connection.as_mut().ok_or_else(not_connected)?;
		let result = bounded(
			&mut self.broken,
			timeout,
			sqlx::Executor::execute(&mut **connection, "ROLLBACK"),
		)
		.await;
		self.in_transaction = false;
		result.map(|_| ())
	}

	async fn close(mut self: Box<Self>) {
		let Some(mut connection) = self.connection.take() else {
			return;
		};
		if self.broken {
			drop(connection.detach());
			return;
		}
		if self.in_transaction {
			let rollback = tokio::time::timeout(
				self.release_timeout,
				sqlx::Executor::execute(&mut *connection, "ROLLBACK"),
			)
			.await;
			if !matches!(rollback, Ok(Ok(_))) {
				warn!("Rollback on release failed; discarding connection");
				drop(connection.detach());
				return;
			}
		}
		drop(connection);
	}
}

impl Drop for PostgresConnection {
	fn drop(&mut self) {
		let Some(mut connection) = self.connection.take() else {
			return;
		};
		if self.broken {
			drop(connection.detach());
			return;
		}
		if !self.in_transaction {
			return;
		}
		// Roll back in the background so the session goes back to the pool clean.
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move {
					let rollback = sqlx::Executor::execute(&mut *connection, "ROLLBACK").await;
					if let Err(e) = rollback {
						warn!("Rollback of dropped connection failed: {}", e);
						drop(connection.detach());
					}
				});
			}
			Err(_) => drop(connection.detach()),
		}
	}
}

/// Maps a sqlx failure onto a [`DriverError`], keeping the original as its source.
pub fn driver_error(error: sqlx::Error) -> DriverError {
	let native = match &error {
		sqlx::Error::Database(db) => {
			let code = db.code().map(|code| code.into_owned());
			let transient = code
				.as_deref()
				.is_some_and(|code| TRANSIENT_SQL_STATES.contains(&code));
			DriverError::server(code, db.message()).with_transient(transient)
		}
		sqlx::Error::Io(io) => match io.kind() {
			ErrorKind::TimedOut => DriverError::timed_out(io.to_string()),
			kind => DriverError::connection(io.to_string()).with_transient(matches!(
				kind,
				ErrorKind::ConnectionRefused
					| ErrorKind::ConnectionReset
					| ErrorKind::ConnectionAborted
					| ErrorKind::NotConnected
					| ErrorKind::BrokenPipe
					| ErrorKind::UnexpectedEof
					| ErrorKind::Interrupted
			)),
		},
		sqlx::Error::PoolTimedOut => DriverError::timed_out(error.to_string()),
		sqlx::Error::PoolClosed
		| sqlx::Error::WorkerCrashed
		| sqlx::Error::Tls(_)
		| sqlx::Error::Protocol(_) => DriverError::connection(error.to_string()),
		_ => DriverError::client(error.to_string()),
	};
	native.with_source(error)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use std::io;

	#[rstest]
	#[case(ErrorKind::ConnectionRefused, true)]
	#[case(ErrorKind::ConnectionReset, true)]
	#[case(ErrorKind::PermissionDenied, false)]
	fn test_io_errors_are_connection_failures(#[case] kind: ErrorKind, #[case] transient: bool) {
		// Arrange
		let error = sqlx::Error::Io(io::Error::new(kind, "socket failure"));

		// Act
		let native = driver_error(error);

		// Assert
		assert_eq!(native.kind(), &DriverErrorKind::Connection { timed_out: false });
		assert_eq!(native.is_transient(), transient);
	}

	#[rstest]
	fn test_io_timeout_is_timed_out() {
		let error = sqlx::Error::Io(io::Error::new(ErrorKind::TimedOut, "read timed out"));

		let native = driver_error(error);

		assert!(native.is_timeout());
	}

	#[rstest]
	fn test_pool_timeout_is_transient_timeout() {
		let native = driver_error(sqlx::Error::PoolTimedOut);

		assert!(native.is_timeout());
		assert!(native.is_transient());
	}

	#[rstest]
	fn test_decode_errors_are_client_errors() {
		let native = driver_error(sqlx::Error::ColumnNotFound("author".to_string()));

		assert_eq!(native.kind(), &DriverErrorKind::Client);
		assert!(!native.is_transient());
	}
}
