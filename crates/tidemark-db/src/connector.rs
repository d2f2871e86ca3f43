//! Resilient connector
//!
//! Opens connections and begins transactions, retrying failures the driver marks
//! as transient. Attempts are spaced by [`BEGIN_RETRY_DELAYS`], counted from the start
//! of the previous attempt.

use crate::backends::classify;
use crate::cancel::cancellable;
use crate::transaction::TransactionHandle;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tidemark_core::{
	AccessMode, DatabaseDriver, DriverError, Error, IsolationLevel, NativeConnection, Result,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delay before each attempt to begin a transaction.
pub const BEGIN_RETRY_DELAYS: [Duration; 4] = [
	Duration::ZERO,
	Duration::from_millis(250),
	Duration::from_millis(500),
	Duration::from_millis(1000),
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a single attempt to begin.
enum AttemptError {
	Driver(DriverError),
	Other(Error),
}

impl From<Error> for AttemptError {
	fn from(error: Error) -> Self {
		AttemptError::Other(error)
	}
}

/// Begins transactions on a [`DatabaseDriver`].
pub struct ResilientConnector {
	driver: Arc<dyn DatabaseDriver>,
	default_access: Option<AccessMode>,
	default_timeout: Duration,
}

impl ResilientConnector {
	pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
		Self {
			driver,
			default_access: None,
			default_timeout: DEFAULT_TIMEOUT,
		}
	}

	/// Access mode new transactions run with unless told otherwise.
	pub fn with_default_access(mut self, access: Option<AccessMode>) -> Self {
		self.default_access = access;
		self
	}

	pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
		self.default_timeout = timeout;
		self
	}

	pub fn default_access(&self) -> Option<AccessMode> {
		self.default_access
	}

	pub fn default_timeout(&self) -> Duration {
		self.default_timeout
	}

	/// Opens a connection without beginning a transaction, retrying transient failures.
	pub async fn open_connection(
		&self,
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<Box<dyn NativeConnection>> {
		let timeout = timeout.unwrap_or(self.default_timeout);
		self.retry("opening connection", ct, move || self.try_open(timeout, ct))
			.await
	}

	/// Begins a transaction.
	///
	/// When `access` is given and differs from the default access, exactly one
	/// `set transaction` statement fixes it before the handle is returned. The
	/// statement is part of the attempt, so its transient failures are retried too.
	///
	/// # Errors
	///
	/// The classified failure of the last attempt, the first non-transient failure,
	/// or [`Error::Canceled`].
	pub async fn begin(
		&self,
		isolation_level: IsolationLevel,
		access: Option<AccessMode>,
		timeout: Option<Duration>,
		ct: &CancellationToken,
	) -> Result<TransactionHandle> {
		let timeout = timeout.unwrap_or(self.default_timeout);
		self.retry("beginning transaction", ct, move || {
			self.try_begin(isolation_level, access, timeout, ct)
		})
		.await
	}

	/// Runs `attempt` on the [`BEGIN_RETRY_DELAYS`] schedule until it succeeds, fails
	/// for good, or the schedule is exhausted.
	async fn retry<T, F, Fut>(
		&self,
		action: &str,
		ct: &CancellationToken,
		mut attempt: F,
	) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = std::result::Result<T, AttemptError>>,
	{
		let mut attempts = 0;
		loop {
			let started = Instant::now();
			let error = match attempt().await {
				Ok(value) => return Ok(value),
				Err(AttemptError::Other(e)) => return Err(e),
				Err(AttemptError::Driver(e)) => e,
			};

			attempts += 1;
			if !error.is_transient() || attempts >= BEGIN_RETRY_DELAYS.len() {
				return Err(classify::into_error(error));
			}

			let delay = BEGIN_RETRY_DELAYS[attempts].saturating_sub(started.elapsed());
			warn!(
				attempt = attempts,
				delay_ms = delay.as_millis() as u64,
				"Transient failure while {}: {}",
				action,
				error
			);
			if delay.is_zero() {
				tokio::task::yield_now().await;
			} else {
				cancellable(ct, tokio::time::sleep(delay)).await?;
			}
		}
	}

	async fn try_open(
		&self,
		timeout: Duration,
		ct: &CancellationToken,
	) -> std::result::Result<Box<dyn NativeConnection>, AttemptError> {
		attempted(cancellable(ct, self.driver.open_connection(timeout)).await)
	}

	/// One attempt. The connection is closed again on every failure path.
	async fn try_begin(
		&self,
		isolation_level: IsolationLevel,
		access: Option<AccessMode>,
		timeout: Duration,
		ct: &CancellationToken,
	) -> std::result::Result<TransactionHandle, AttemptError> {
		let mut connection = self.try_open(timeout, ct).await?;
		let locked = match self
			.start(connection.as_mut(), isolation_level, access, timeout, ct)
			.await
		{
			Ok(locked) => locked,
			Err(e) => {
				connection.close().await;
				return Err(e);
			}
		};
		let handle =
			TransactionHandle::new(connection, isolation_level, self.default_access, timeout);
		Ok(match locked {
			Some(mode) => handle.with_locked_access(mode),
			None => handle,
		})
	}

	/// Begins the transaction and, when needed, sets its access. Returns the access
	/// mode fixed by a `set transaction` statement.
	async fn start(
		&self,
		connection: &mut (dyn NativeConnection + 'static),
		isolation_level: IsolationLevel,
		access: Option<AccessMode>,
		timeout: Duration,
		ct: &CancellationToken,
	) -> std::result::Result<Option<AccessMode>, AttemptError> {
		attempted(cancellable(ct, connection.begin_transaction(isolation_level, timeout)).await)?;
		debug!(isolation = %isolation_level, "Began transaction");
		match access {
			Some(mode) if Some(mode) != self.default_access => {
				let statement = connection.execute(mode.set_transaction_sql(), &[], timeout);
				attempted(cancellable(ct, statement).await)?;
				Ok(Some(mode))
			}
			_ => Ok(None),
		}
	}
}

fn attempted<T>(
	outcome: Result<std::result::Result<T, DriverError>>,
) -> std::result::Result<T, AttemptError> {
	outcome?.map_err(AttemptError::Driver)
}

impl fmt::Debug for ResilientConnector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResilientConnector")
			.field("default_access", &self.default_access)
			.field("default_timeout", &self.default_timeout)
			.finish_non_exhaustive()
	}
}
