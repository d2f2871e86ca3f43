//! Transaction scope
//!
//! A [`TransactionScope`] belongs to one logical unit of work and owns at most one
//! [`TransactionHandle`]. Consumers ask for the access they need; the scope starts the
//! transaction on first use and widens an unspecified transaction in place.
//!
//! | request \ state | Empty | Unspecified | ReadWrite | ReadOnly |
//! |---|---|---|---|---|
//! | `want_rw` | begin read-write | upgrade | no-op | rejected |
//! | `want_ro` | begin read-only | upgrade | rejected | no-op |
//! | `want_any` | begin unspecified | no-op | no-op | no-op |
//!
//! A rejected or failed request leaves the state as it was. The isolation level only
//! matters when the transaction is begun.

use crate::connector::ResilientConnector;
use crate::transaction::access::{RoTransaction, RwTransaction};
use crate::transaction::handle::TransactionHandle;
use std::sync::Arc;
use tidemark_core::{AccessMode, Error, IsolationLevel, Result};
use tokio_util::sync::CancellationToken;

/// Observable state of a [`TransactionScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeAccess {
	Empty,
	Unspecified,
	ReadWrite,
	ReadOnly,
}

#[derive(Debug)]
enum ScopeState {
	Empty,
	Unspecified(TransactionHandle),
	ReadWrite(TransactionHandle),
	ReadOnly(TransactionHandle),
}

impl ScopeState {
	fn concrete(mode: AccessMode, handle: TransactionHandle) -> Self {
		match mode {
			AccessMode::ReadWrite => ScopeState::ReadWrite(handle),
			AccessMode::ReadOnly => ScopeState::ReadOnly(handle),
		}
	}
}

/// Lazily started transaction shared by the consumers of one unit of work.
#[derive(Debug)]
pub struct TransactionScope {
	connector: Arc<ResilientConnector>,
	state: ScopeState,
}

impl TransactionScope {
	pub fn new(connector: Arc<ResilientConnector>) -> Self {
		Self {
			connector,
			state: ScopeState::Empty,
		}
	}

	pub fn state(&self) -> ScopeAccess {
		match self.state {
			ScopeState::Empty => ScopeAccess::Empty,
			ScopeState::Unspecified(_) => ScopeAccess::Unspecified,
			ScopeState::ReadWrite(_) => ScopeAccess::ReadWrite,
			ScopeState::ReadOnly(_) => ScopeAccess::ReadOnly,
		}
	}

	/// The owned handle, if a transaction has begun.
	pub fn handle(&self) -> Option<&TransactionHandle> {
		match &self.state {
			ScopeState::Empty => None,
			ScopeState::Unspecified(handle)
			| ScopeState::ReadWrite(handle)
			| ScopeState::ReadOnly(handle) => Some(handle),
		}
	}

	/// Read-write transaction of this scope.
	///
	/// # Errors
	///
	/// [`Error::InvalidOperation`] when the scope already runs read-only.
	pub async fn want_rw(
		&mut self,
		isolation_level: IsolationLevel,
		ct: &CancellationToken,
	) -> Result<RwTransaction<'_>> {
		let handle = self
			.want(AccessMode::ReadWrite, isolation_level, ct)
			.await?;
		Ok(RwTransaction::new(handle))
	}

	/// Read-only transaction of this scope.
	///
	/// # Errors
	///
	/// [`Error::InvalidOperation`] when the scope already runs read-write.
	pub async fn want_ro(
		&mut self,
		isolation_level: IsolationLevel,
		ct: &CancellationToken,
	) -> Result<RoTransaction<'_>> {
		let handle = self
			.want(AccessMode::ReadOnly, isolation_level, ct)
			.await?;
		Ok(RoTransaction::new(handle))
	}

	/// Transaction of this scope in whatever access it runs with.
	pub async fn want_any(
		&mut self,
		isolation_level: IsolationLevel,
		ct: &CancellationToken,
	) -> Result<&mut TransactionHandle> {
		if self.state() == ScopeAccess::Empty {
			let handle = self
				.connector
				.begin(isolation_level, None, None, ct)
				.await?;
			self.state = ScopeState::Unspecified(handle);
		}
		self.handle_mut()
	}

	/// Disposes the owned handle, if any, and returns the scope to empty.
	pub async fn dispose(&mut self) {
		match std::mem::replace(&mut self.state, ScopeState::Empty) {
			ScopeState::Empty => {}
			ScopeState::Unspecified(mut handle)
			| ScopeState::ReadWrite(mut handle)
			| ScopeState::ReadOnly(mut handle) => handle.dispose().await,
		}
	}

	async fn want(
		&mut self,
		mode: AccessMode,
		isolation_level: IsolationLevel,
		ct: &CancellationToken,
	) -> Result<&mut TransactionHandle> {
		match (self.state(), mode) {
			(ScopeAccess::Empty, _) => {
				let handle = self
					.connector
					.begin(isolation_level, Some(mode), None, ct)
					.await?;
				self.state = ScopeState::concrete(mode, handle);
			}
			(ScopeAccess::Unspecified, _) => self.upgrade(mode, ct).await?,
			(ScopeAccess::ReadWrite, AccessMode::ReadWrite)
			| (ScopeAccess::ReadOnly, AccessMode::ReadOnly) => {}
			(ScopeAccess::ReadOnly, AccessMode::ReadWrite) => {
				return Err(Error::InvalidOperation(
					"Not allowed to change read-only access to read-write.".to_string(),
				));
			}
			(ScopeAccess::ReadWrite, AccessMode::ReadOnly) => {
				return Err(Error::InvalidOperation(
					"Not allowed to change read-write access to read-only.".to_string(),
				));
			}
		}
		self.handle_mut()
	}

	/// Sets the access of the unspecified handle, then moves it to the concrete state.
	async fn upgrade(&mut self, mode: AccessMode, ct: &CancellationToken) -> Result<()> {
		if let ScopeState::Unspecified(handle) = &mut self.state {
			handle.set_access(mode, ct).await?;
		}
		self.state = match std::mem::replace(&mut self.state, ScopeState::Empty) {
			ScopeState::Unspecified(handle) => ScopeState::concrete(mode, handle),
			other => other,
		};
		Ok(())
	}

	fn handle_mut(&mut self) -> Result<&mut TransactionHandle> {
		match &mut self.state {
			ScopeState::Empty => Err(Error::InvalidOperation(
				"Transaction scope has no transaction.".to_string(),
			)),
			ScopeState::Unspecified(handle)
			| ScopeState::ReadWrite(handle)
			| ScopeState::ReadOnly(handle) => Ok(handle),
		}
	}
}
