//! Transaction provider

use crate::connector::ResilientConnector;
use crate::transaction::handle::TransactionHandle;
use crate::transaction::scope::TransactionScope;
use futures::future::BoxFuture;
use std::sync::Arc;
use tidemark_core::{AccessMode, IsolationLevel, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Entry point for beginning transactions and creating scopes.
#[derive(Debug, Clone)]
pub struct TransactionProvider {
	connector: Arc<ResilientConnector>,
}

impl TransactionProvider {
	pub fn new(connector: Arc<ResilientConnector>) -> Self {
		Self { connector }
	}

	pub fn connector(&self) -> &Arc<ResilientConnector> {
		&self.connector
	}

	/// Empty scope for a new unit of work.
	pub fn scope(&self) -> TransactionScope {
		TransactionScope::new(self.connector.clone())
	}

	pub async fn begin(
		&self,
		isolation_level: IsolationLevel,
		access: Option<AccessMode>,
		ct: &CancellationToken,
	) -> Result<TransactionHandle> {
		self.connector
			.begin(isolation_level, access, None, ct)
			.await
	}

	pub async fn begin_rw(
		&self,
		isolation_level: IsolationLevel,
		ct: &CancellationToken,
	) -> Result<TransactionHandle> {
		self.begin(isolation_level, Some(AccessMode::ReadWrite), ct)
			.await
	}

	pub async fn begin_ro(
		&self,
		isolation_level: IsolationLevel,
		ct: &CancellationToken,
	) -> Result<TransactionHandle> {
		self.begin(isolation_level, Some(AccessMode::ReadOnly), ct)
			.await
	}

	pub async fn begin_serializable(
		&self,
		access: Option<AccessMode>,
		ct: &CancellationToken,
	) -> Result<TransactionHandle> {
		self.begin(IsolationLevel::Serializable, access, ct).await
	}

	pub async fn begin_rw_serializable(&self, ct: &CancellationToken) -> Result<TransactionHandle> {
		self.begin_serializable(Some(AccessMode::ReadWrite), ct)
			.await
	}

	/// Runs `work` in a fresh transaction.
	///
	/// Commits when `work` succeeds, rolls back when it fails, and disposes the handle
	/// either way.
	///
	/// # Examples
	///
	/// ```rust,no_run
	/// use tidemark_core::{AccessMode, IsolationLevel};
	/// use tidemark_db::transaction::{SqlWrite, TransactionProvider};
	/// use tokio_util::sync::CancellationToken;
	///
	/// # async fn example(provider: TransactionProvider) -> tidemark_core::Result<()> {
	/// let ct = CancellationToken::new();
	/// provider
	///     .using(IsolationLevel::ReadCommitted, Some(AccessMode::ReadWrite), &ct, |tx| {
	///         let ct = ct.clone();
	///         Box::pin(async move {
	///             tx.execute("delete from sessions where expired", &[], &ct).await
	///         })
	///     })
	///     .await?;
	/// # Ok(())
	/// # }
	/// ```
	pub async fn using<T, F>(
		&self,
		isolation_level: IsolationLevel,
		access: Option<AccessMode>,
		ct: &CancellationToken,
		work: F,
	) -> Result<T>
	where
		F: for<'t> FnOnce(&'t mut TransactionHandle) -> BoxFuture<'t, Result<T>>,
	{
		let mut handle = self.begin(isolation_level, access, ct).await?;
		let result = match work(&mut handle).await {
			Ok(value) => handle.commit(ct).await.map(|()| value),
			Err(e) => {
				if let Err(rollback) = handle.rollback(ct).await {
					warn!("Rollback after failed work failed: {}", rollback);
				}
				Err(e)
			}
		};
		handle.dispose().await;
		result
	}
}
