//! Transaction handle
//!
//! A [`TransactionHandle`] owns one native connection with an open transaction. It is
//! released exactly once: on commit, on rollback, on [`TransactionHandle::dispose`] or,
//! as a last resort, when dropped.

use crate::backends::classify;
use crate::cancel::cancellable;
use crate::transaction::access::{RoTransaction, RwTransaction};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tidemark_core::{
	AccessMode, Error, IsolationLevel, NativeConnection, QueryValue, Result, Row, SqlError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type SyncCallback = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type AsyncCallback = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Callback queued to run once the transaction is committed.
enum AfterCommit {
	Sync(SyncCallback),
	Async(AsyncCallback),
}

#[derive(Default)]
struct CommitState {
	committed: bool,
	callbacks: Vec<AfterCommit>,
}

/// One open database transaction.
pub struct TransactionHandle {
	connection: Option<Box<dyn NativeConnection>>,
	isolation_level: IsolationLevel,
	initial_access: Option<AccessMode>,
	access: Option<AccessMode>,
	/// Set once an explicit `set transaction` statement fixed the access mode.
	access_locked: bool,
	default_timeout: Duration,
	disposed: AtomicBool,
	commit_state: Mutex<CommitState>,
}

impl TransactionHandle {
	/// Wraps a connection on which a transaction has already begun.
	///
	/// `access` is what the transaction currently runs with: the driver default, or
	/// nothing when that is unknown.
	pub fn new(
		connection: Box<dyn NativeConnection>,
		isolation_level: IsolationLevel,
		access: Option<AccessMode>,
		default_timeout: Duration,
	) -> Self {
		Self {
			connection: Some(connection),
			isolation_level,
			initial_access: access,
			access,
			access_locked: false,
			default_timeout,
			disposed: AtomicBool::new(false),
			commit_state: Mutex::new(CommitState::default()),
		}
	}

	/// Marks the access mode as fixed by a `set transaction` statement issued before
	/// the handle was built.
	pub(crate) fn with_locked_access(mut self, mode: AccessMode) -> Self {
		self.access = Some(mode);
		self.access_locked = true;
		self
	}

	pub fn isolation_level(&self) -> IsolationLevel {
		self.isolation_level
	}

	/// Access mode the transaction was created with.
	pub fn initial_access(&self) -> Option<AccessMode> {
		self.initial_access
	}

	pub fn access(&self) -> Option<AccessMode> {
		self.access
	}

	pub fn default_timeout(&self) -> Duration {
		self.default_timeout
	}

	pub fn is_committed(&self) -> bool {
		self.commit_state.lock().committed
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::Acquire)
	}

	/// Read-write view of this handle. Fails unless the access is read-write.
	pub fn as_read_write(&mut self) -> Result<RwTransaction<'_>> {
		match self.access {
			Some(AccessMode::ReadWrite) => Ok(RwTransaction::new(self)),
			other => Err(Error::InvalidOperation(format!(
				"Transaction access is {}, not read-write.",
				describe(other)
			))),
		}
	}

	/// Read-only view of this handle. Fails unless the access is read-only.
	pub fn as_read_only(&mut self) -> Result<RoTransaction<'_>> {
		match self.access {
			Some(AccessMode::ReadOnly) => Ok(RoTransaction::new(self)),
			other => Err(Error::InvalidOperation(format!(
				"Transaction access is {}, not read-only.",
				describe(other)
			))),
		}
	}

	/// Queues `callback` to run after a successful commit.
	pub fn on_committed<F>(&self, callback: F) -> Result<()>
	where
		F: FnOnce() -> anyhow::Result<()> + Send + 'static,
	{
		self.register(AfterCommit::Sync(Box::new(callback)))
	}

	/// Queues an asynchronous `callback` to run after a successful commit.
	pub fn on_committed_async<F, Fut>(&self, callback: F) -> Result<()>
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
	{
		self.register(AfterCommit::Async(Box::new(move || callback().boxed())))
	}

	fn register(&self, callback: AfterCommit) -> Result<()> {
		let mut state = self.commit_state.lock();
		if state.committed {
			return Err(Error::AlreadyCommitted);
		}
		if self.is_disposed() {
			return Err(Error::Disposed);
		}
		state.callbacks.push(callback);
		Ok(())
	}

	/// Connection of a live transaction.
	fn live(&mut self) -> Result<&mut (dyn NativeConnection + 'static)> {
		if self.commit_state.get_mut().committed {
			return Err(Error::AlreadyCommitted);
		}
		match self.connection.as_deref_mut() {
			Some(connection) => Ok(connection),
			None => Err(Error::Disposed),
		}
	}

	/// Fixes the access mode with an explicit `set transaction` statement.
	///
	/// Setting the mode the handle is already locked to is a no-op; switching a locked
	/// handle to the other mode is rejected.
	pub(crate) async fn set_access(
		&mut self,
		mode: AccessMode,
		ct: &CancellationToken,
	) -> Result<()> {
		if self.access_locked {
			return match self.access {
				Some(current) if current == mode => Ok(()),
				current => Err(Error::InvalidOperation(format!(
					"Transaction access is already set to {}.",
					describe(current)
				))),
			};
		}
		let timeout = self.default_timeout;
		let connection = self.live()?;
		cancellable(ct, connection.execute(mode.set_transaction_sql(), &[], timeout))
			.await?
			.map_err(classify::into_error)?;
		self.access = Some(mode);
		self.access_locked = true;
		Ok(())
	}

	pub(crate) async fn execute_statement(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<u64> {
		let timeout = timeout.unwrap_or(self.default_timeout);
		let connection = self.live()?;
		cancellable(ct, connection.execute(sql, params, timeout))
			.await?
			.map_err(classify::into_error)
	}

	pub(crate) async fn execute_script(
		&mut self,
		sql: &str,
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<u64> {
		let timeout = timeout.unwrap_or(self.default_timeout);
		let connection = self.live()?;
		cancellable(ct, connection.execute_batch(sql, timeout))
			.await?
			.map_err(classify::into_error)
	}

	pub(crate) async fn query_statement(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<Vec<Row>> {
		let timeout = timeout.unwrap_or(self.default_timeout);
		let connection = self.live()?;
		cancellable(ct, connection.query(sql, params, timeout))
			.await?
			.map_err(classify::into_error)
	}

	/// Commits, releases the connection, then runs every post-commit callback in
	/// registration order.
	///
	/// A failed commit runs no callback. When callbacks fail the transaction stays
	/// committed and the first failure is returned as [`SqlError::AfterCommit`].
	pub async fn commit(&mut self, ct: &CancellationToken) -> Result<()> {
		let timeout = self.default_timeout;
		let connection = self.live()?;
		cancellable(ct, connection.commit(timeout))
			.await?
			.map_err(classify::into_error)?;

		let callbacks = {
			let mut state = self.commit_state.lock();
			state.committed = true;
			std::mem::take(&mut state.callbacks)
		};
		self.release().await;
		run_callbacks(callbacks).await
	}

	/// Rolls back and releases the connection. Queued callbacks are discarded.
	pub async fn rollback(&mut self, ct: &CancellationToken) -> Result<()> {
		let timeout = self.default_timeout;
		let connection = self.live()?;
		let result = cancellable(ct, connection.rollback(timeout))
			.await
			.and_then(|rollback| rollback.map_err(classify::into_error));
		self.dispose().await;
		result
	}

	/// Releases the connection, rolling back an unfinished transaction. Idempotent.
	pub async fn dispose(&mut self) {
		self.commit_state.get_mut().callbacks.clear();
		self.release().await;
	}

	async fn release(&mut self) {
		if self.disposed.swap(true, Ordering::AcqRel) {
			return;
		}
		if let Some(connection) = self.connection.take() {
			connection.close().await;
		}
	}
}

impl Drop for TransactionHandle {
	fn drop(&mut self) {
		if !self.disposed.swap(true, Ordering::AcqRel) && self.connection.is_some() {
			debug!("Transaction handle dropped without disposal; releasing connection");
		}
	}
}

impl fmt::Debug for TransactionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TransactionHandle")
			.field("isolation_level", &self.isolation_level)
			.field("access", &self.access)
			.field("access_locked", &self.access_locked)
			.field("default_timeout", &self.default_timeout)
			.field("committed", &self.is_committed())
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

fn describe(access: Option<AccessMode>) -> String {
	match access {
		Some(mode) => mode.to_string(),
		None => "unspecified".to_string(),
	}
}

async fn run_callbacks(callbacks: Vec<AfterCommit>) -> Result<()> {
	let mut first_failure = None;
	for callback in callbacks {
		let outcome = match callback {
			AfterCommit::Sync(callback) => callback(),
			AfterCommit::Async(callback) => callback().await,
		};
		if let Err(e) = outcome {
			match first_failure {
				None => first_failure = Some(e),
				Some(_) => warn!("Post-commit callback failed: {:#}", e),
			}
		}
	}
	match first_failure {
		Some(source) => Err(SqlError::AfterCommit { source }.into()),
		None => Ok(()),
	}
}
