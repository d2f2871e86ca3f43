//! Capability traits
//!
//! Statement execution is split by capability. A read-only view implements
//! [`SqlRead`] and [`SqlCommit`] only, so write statements on it do not compile.
//!
//! | type | [`SqlRead`] | [`SqlWrite`] | [`SqlCommit`] |
//! |---|---|---|---|
//! | [`TransactionHandle`] | yes | yes | yes |
//! | [`RwTransaction`] | yes | yes | yes |
//! | [`RoTransaction`] | yes | no | yes |

use crate::transaction::handle::TransactionHandle;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tidemark_core::{Affect, Error, IsolationLevel, QueryValue, Result, Row, RowError};
use tokio_util::sync::CancellationToken;

/// Queries.
#[async_trait]
pub trait SqlRead: Send {
	/// Runs a query, overriding the default timeout when `timeout` is given.
	async fn query_rows_with_timeout(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<Vec<Row>>;

	async fn query_rows(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<Vec<Row>> {
		self.query_rows_with_timeout(sql, params, None, ct).await
	}

	async fn query_first_row_optional(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<Option<Row>> {
		let rows = self.query_rows(sql, params, ct).await?;
		Ok(rows.into_iter().next())
	}

	/// First row of the result; an empty result is an assertion failure.
	async fn query_first_row(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<Row> {
		self.query_first_row_optional(sql, params, ct)
			.await?
			.ok_or_else(|| Error::assertion("Expected query to return at least one row."))
	}

	/// The only row of the result, if any; more than one row is an assertion failure.
	async fn query_single_row_optional(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<Option<Row>> {
		let mut rows = self.query_rows(sql, params, ct).await?;
		match rows.len() {
			0 | 1 => Ok(rows.pop()),
			n => Err(Error::assertion(format!(
				"Expected query to return single row, but returned {} rows.",
				n
			))),
		}
	}

	async fn query_single_row(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<Row> {
		self.query_single_row_optional(sql, params, ct)
			.await?
			.ok_or_else(|| {
				Error::assertion("Expected query to return single row, but returned 0 rows.")
			})
	}

	/// First column of the first row.
	async fn query_scalar<T>(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<T>
	where
		T: TryFrom<QueryValue, Error = RowError> + Send,
	{
		let row = self.query_first_row(sql, params, ct).await?;
		let value = row
			.first_value()
			.cloned()
			.ok_or_else(|| Error::assertion("Expected query to return at least one column."))?;
		Ok(T::try_from(value)?)
	}
}

/// Statements that modify data or schema.
#[async_trait]
pub trait SqlWrite: SqlRead {
	/// Executes a statement and checks the number of affected rows against `affect`.
	async fn execute_with_timeout(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		affect: Affect,
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<u64>;

	/// Executes a parameterless script that may hold several statements.
	async fn execute_batch(&mut self, sql: &str, ct: &CancellationToken) -> Result<u64>;

	async fn execute(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<()> {
		self.execute_with_timeout(sql, params, Affect::Any, None, ct)
			.await
			.map(|_| ())
	}

	async fn execute_affecting(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		affect: Affect,
		ct: &CancellationToken,
	) -> Result<u64> {
		self.execute_with_timeout(sql, params, affect, None, ct)
			.await
	}

	/// Number of rows the statement affected.
	async fn query_affected_rows(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		ct: &CancellationToken,
	) -> Result<u64> {
		self.execute_with_timeout(sql, params, Affect::Any, None, ct)
			.await
	}
}

/// Transaction completion and post-commit callbacks.
#[async_trait]
pub trait SqlCommit: Send {
	fn isolation_level(&self) -> IsolationLevel;

	fn on_committed<F>(&self, callback: F) -> Result<()>
	where
		F: FnOnce() -> anyhow::Result<()> + Send + 'static;

	fn on_committed_async<F, Fut>(&self, callback: F) -> Result<()>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = anyhow::Result<()>> + Send + 'static;

	async fn commit(&mut self, ct: &CancellationToken) -> Result<()>;

	async fn rollback(&mut self, ct: &CancellationToken) -> Result<()>;
}

fn check_affected(sql: &str, affect: Affect, affected: u64) -> Result<u64> {
	match affect.violation(affected) {
		Some(violation) => Err(Error::assertion(format!("{}\n{}", violation, sql))),
		None => Ok(affected),
	}
}

#[async_trait]
impl SqlRead for TransactionHandle {
	async fn query_rows_with_timeout(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<Vec<Row>> {
		self.query_statement(sql, params, timeout, ct).await
	}
}

#[async_trait]
impl SqlWrite for TransactionHandle {
	async fn execute_with_timeout(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		affect: Affect,
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<u64> {
		let affected = self.execute_statement(sql, params, timeout, ct).await?;
		check_affected(sql, affect, affected)
	}

	async fn execute_batch(&mut self, sql: &str, ct: &CancellationToken) -> Result<u64> {
		self.execute_script(sql, None, ct).await
	}
}

#[async_trait]
impl SqlCommit for TransactionHandle {
	fn isolation_level(&self) -> IsolationLevel {
		TransactionHandle::isolation_level(self)
	}

	fn on_committed<F>(&self, callback: F) -> Result<()>
	where
		F: FnOnce() -> anyhow::Result<()> + Send + 'static,
	{
		TransactionHandle::on_committed(self, callback)
	}

	fn on_committed_async<F, Fut>(&self, callback: F) -> Result<()>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
	{
		TransactionHandle::on_committed_async(self, callback)
	}

	async fn commit(&mut self, ct: &CancellationToken) -> Result<()> {
		TransactionHandle::commit(self, ct).await
	}

	async fn rollback(&mut self, ct: &CancellationToken) -> Result<()> {
		TransactionHandle::rollback(self, ct).await
	}
}

/// Read-write view of a [`TransactionHandle`].
#[derive(Debug)]
pub struct RwTransaction<'a> {
	inner: &'a mut TransactionHandle,
}

/// Read-only view of a [`TransactionHandle`]. Write statements are not available.
#[derive(Debug)]
pub struct RoTransaction<'a> {
	inner: &'a mut TransactionHandle,
}

impl<'a> RwTransaction<'a> {
	pub(crate) fn new(inner: &'a mut TransactionHandle) -> Self {
		Self { inner }
	}

	/// The underlying handle.
	pub fn handle(&self) -> &TransactionHandle {
		self.inner
	}
}

impl<'a> RoTransaction<'a> {
	pub(crate) fn new(inner: &'a mut TransactionHandle) -> Self {
		Self { inner }
	}

	pub fn handle(&self) -> &TransactionHandle {
		self.inner
	}
}

macro_rules! delegate_read_commit {
	($view:ident) => {
		#[async_trait]
		impl SqlRead for $view<'_> {
			async fn query_rows_with_timeout(
				&mut self,
				sql: &str,
				params: &[QueryValue],
				timeout: Option<Duration>,
				ct: &CancellationToken,
			) -> Result<Vec<Row>> {
				self.inner
					.query_rows_with_timeout(sql, params, timeout, ct)
					.await
			}
		}

		#[async_trait]
		impl SqlCommit for $view<'_> {
			fn isolation_level(&self) -> IsolationLevel {
				self.inner.isolation_level()
			}

			fn on_committed<F>(&self, callback: F) -> Result<()>
			where
				F: FnOnce() -> anyhow::Result<()> + Send + 'static,
			{
				self.inner.on_committed(callback)
			}

			fn on_committed_async<F, Fut>(&self, callback: F) -> Result<()>
			where
				F: FnOnce() -> Fut + Send + 'static,
				Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
			{
				self.inner.on_committed_async(callback)
			}

			async fn commit(&mut self, ct: &CancellationToken) -> Result<()> {
				self.inner.commit(ct).await
			}

			async fn rollback(&mut self, ct: &CancellationToken) -> Result<()> {
				self.inner.rollback(ct).await
			}
		}
	};
}

delegate_read_commit!(RwTransaction);
delegate_read_commit!(RoTransaction);

#[async_trait]
impl SqlWrite for RwTransaction<'_> {
	async fn execute_with_timeout(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		affect: Affect,
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<u64> {
		self.inner
			.execute_with_timeout(sql, params, affect, timeout, ct)
			.await
	}

	async fn execute_batch(&mut self, sql: &str, ct: &CancellationToken) -> Result<u64> {
		SqlWrite::execute_batch(&mut *self.inner, sql, ct).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use tidemark_core::{AccessMode, DatabaseDriver, SqlError};
	use tidemark_test::driver::{Reply, ScriptedDriver};

	async fn open(driver: &ScriptedDriver, access: AccessMode) -> TransactionHandle {
		let mut connection = driver.open_connection(Duration::from_secs(1)).await.unwrap();
		connection
			.begin_transaction(IsolationLevel::ReadCommitted, Duration::from_secs(1))
			.await
			.unwrap();
		TransactionHandle::new(
			connection,
			IsolationLevel::ReadCommitted,
			Some(access),
			Duration::from_secs(30),
		)
	}

	fn post(id: i64, title: &str) -> Row {
		Row::new().with("id", id).with("title", title)
	}

	#[rstest]
	#[case(0, Ok(None))]
	#[case(1, Ok(Some(1)))]
	#[case(2, Err("Expected query to return single row, but returned 2 rows."))]
	#[tokio::test]
	async fn test_query_single_row_optional(
		#[case] count: i64,
		#[case] expected: std::result::Result<Option<i64>, &str>,
	) {
		// Arrange
		let driver = ScriptedDriver::new();
		driver.respond("from posts", move |_| {
			Ok(Reply::rows((1..=count).map(|id| post(id, "Hello")).collect()))
		});
		let mut handle = open(&driver, AccessMode::ReadOnly).await;
		let mut tx = handle.as_read_only().unwrap();

		// Act
		let result = tx
			.query_single_row_optional("select id, title from posts", &[], &CancellationToken::new())
			.await;

		// Assert
		match (result, expected) {
			(Ok(row), Ok(id)) => assert_eq!(row.map(|row| row.get::<i64>("id").unwrap()), id),
			(Err(Error::Sql(SqlError::Assertion(message))), Err(expected)) => {
				assert_eq!(message, expected)
			}
			(result, expected) => panic!("got {:?}, expected {:?}", result, expected),
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_query_first_row_requires_a_row() {
		let driver = ScriptedDriver::new();
		let mut handle = open(&driver, AccessMode::ReadOnly).await;

		let result = handle
			.query_first_row("select id from posts", &[], &CancellationToken::new())
			.await;

		match result {
			Err(Error::Sql(SqlError::Assertion(message))) => {
				assert_eq!(message, "Expected query to return at least one row.")
			}
			other => panic!("expected assertion failure, got {:?}", other),
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_query_scalar_reads_first_column() {
		// Arrange
		let driver = ScriptedDriver::new();
		driver.respond("count(*)", |_| Ok(Reply::rows(vec![Row::new().with("count", 3i64)])));
		let mut handle = open(&driver, AccessMode::ReadOnly).await;

		// Act
		let count: i64 = handle
			.query_scalar("select count(*) from posts", &[], &CancellationToken::new())
			.await
			.unwrap();

		// Assert
		assert_eq!(count, 3);
	}

	#[rstest]
	#[case(Affect::Any, 0, true)]
	#[case(Affect::SingleRow, 1, true)]
	#[case(Affect::SingleRow, 2, false)]
	#[case(Affect::AtLeastOneRow, 0, false)]
	#[case(Affect::AtLeastOneRow, 5, true)]
	#[tokio::test]
	async fn test_execute_affecting(
		#[case] affect: Affect,
		#[case] affected: u64,
		#[case] accepted: bool,
	) {
		// Arrange
		let driver = ScriptedDriver::new();
		driver.respond("update posts", move |_| Ok(Reply::affected(affected)));
		let mut handle = open(&driver, AccessMode::ReadWrite).await;
		let mut tx = handle.as_read_write().unwrap();

		// Act
		let result = tx
			.execute_affecting(
				"update posts set title = $1",
				&["Hello".into()],
				affect,
				&CancellationToken::new(),
			)
			.await;

		// Assert
		assert_eq!(result.is_ok(), accepted);
		if let Err(error) = result {
			assert!(error.to_string().ends_with("\nupdate posts set title = $1"));
		}
	}

	#[rstest]
	#[tokio::test]
	async fn test_view_commit_reaches_handle() {
		// Arrange
		let driver = ScriptedDriver::new();
		let mut handle = open(&driver, AccessMode::ReadWrite).await;
		let ct = CancellationToken::new();

		// Act
		{
			let mut tx = handle.as_read_write().unwrap();
			tx.execute("insert into posts(title) values ($1)", &["Hello".into()], &ct)
				.await
				.unwrap();
			tx.commit(&ct).await.unwrap();
		}

		// Assert
		assert!(handle.is_committed());
		assert_eq!(
			driver.statements(),
			vec!["insert into posts(title) values ($1)".to_string()]
		);
	}
}
