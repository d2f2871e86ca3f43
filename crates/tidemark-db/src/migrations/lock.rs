//! Migration lock
//!
//! Cross-process mutual exclusion through an `access exclusive` lock on the empty
//! sentinel table `"<schema>".migration_sync`. The lock is held by an open read-write
//! transaction and released when that transaction ends.

use crate::transaction::{SqlWrite, TransactionHandle, TransactionProvider};
use std::time::Duration;
use tidemark_core::{AccessMode, Affect, IsolationLevel, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to wait for another process to release the lock.
pub const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Attempts at creating the sentinel; concurrent creators race on the catalog.
const ENSURE_ATTEMPTS: usize = 3;

pub(crate) fn ensure_sentinel_sql(schema: &str) -> String {
	format!(
		r#"create schema if not exists "{schema}";
create table if not exists "{schema}".migration_sync()"#
	)
}

pub(crate) fn lock_sql(schema: &str) -> String {
	format!(r#"lock "{schema}".migration_sync in access exclusive mode"#)
}

/// Held migration lock.
///
/// Call [`MigrationLock::release`] when done. Dropping the lock releases the
/// connection as well, with the rollback happening in the background.
#[derive(Debug)]
pub struct MigrationLock {
	schema: String,
	handle: Option<TransactionHandle>,
}

impl MigrationLock {
	/// Waits until the lock of `schema` is acquired.
	pub async fn acquire(
		provider: &TransactionProvider,
		schema: &str,
		ct: &CancellationToken,
	) -> Result<Self> {
		ensure_sentinel(provider, schema, ct).await?;

		let mut handle = provider
			.begin(
				IsolationLevel::ReadCommitted,
				Some(AccessMode::ReadWrite),
				ct,
			)
			.await?;
		let locked = handle
			.execute_with_timeout(
				&lock_sql(schema),
				&[],
				Affect::Any,
				Some(LOCK_WAIT_TIMEOUT),
				ct,
			)
			.await;
		if let Err(e) = locked {
			handle.dispose().await;
			return Err(e);
		}
		debug!(schema, "Acquired migration lock");
		Ok(Self {
			schema: schema.to_string(),
			handle: Some(handle),
		})
	}

	pub fn schema(&self) -> &str {
		&self.schema
	}

	/// Rolls back the locking transaction and releases its connection.
	pub async fn release(mut self) {
		if let Some(mut handle) = self.handle.take() {
			if let Err(e) = handle.rollback(&CancellationToken::new()).await {
				warn!(schema = %self.schema, "Releasing migration lock failed: {}", e);
			}
			debug!(schema = %self.schema, "Released migration lock");
		}
	}
}

async fn ensure_sentinel(
	provider: &TransactionProvider,
	schema: &str,
	ct: &CancellationToken,
) -> Result<()> {
	let mut attempt = 1;
	loop {
		let sql = ensure_sentinel_sql(schema);
		let token = ct.clone();
		let ensured = provider
			.using(
				IsolationLevel::ReadCommitted,
				Some(AccessMode::ReadWrite),
				ct,
				|tx| Box::pin(async move { tx.execute_batch(&sql, &token).await.map(|_| ()) }),
			)
			.await;
		match ensured {
			Err(e) if e.is_unique_violation() && attempt < ENSURE_ATTEMPTS => {
				debug!(schema, attempt, "Sentinel creation raced with another process");
				attempt += 1;
			}
			other => return other,
		}
	}
}
