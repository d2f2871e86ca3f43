//! Migration completion signal

use std::fmt;
use std::sync::Arc;
use tidemark_core::{Error, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Terminal outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationResult {
	Succeeded,
	/// Human-readable description of the failure.
	Failed(String),
	Canceled,
}

impl fmt::Display for MigrationResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MigrationResult::Succeeded => f.write_str("succeeded"),
			MigrationResult::Failed(info) => write!(f, "failed: {}", info),
			MigrationResult::Canceled => f.write_str("canceled"),
		}
	}
}

/// Single-assignment broadcast of the [`MigrationResult`].
///
/// Clones share the same slot. Waiters that subscribe after completion see the
/// result immediately.
///
/// # Examples
///
/// ```
/// use tidemark_db::migrations::{MigrationResult, MigrationSignal};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let signal = MigrationSignal::new();
/// assert!(signal.complete(MigrationResult::Succeeded));
/// assert!(!signal.complete(MigrationResult::Canceled));
///
/// let result = signal.wait(&CancellationToken::new()).await.unwrap();
/// assert_eq!(result, MigrationResult::Succeeded);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct MigrationSignal {
	sender: Arc<watch::Sender<Option<MigrationResult>>>,
}

impl MigrationSignal {
	pub fn new() -> Self {
		let (sender, _) = watch::channel(None);
		Self {
			sender: Arc::new(sender),
		}
	}

	/// Sets the result. Returns `false`, leaving the stored result untouched, when a
	/// result was already set.
	pub fn complete(&self, result: MigrationResult) -> bool {
		self.sender.send_if_modified(|slot| match slot {
			Some(_) => false,
			None => {
				*slot = Some(result);
				true
			}
		})
	}

	pub fn result(&self) -> Option<MigrationResult> {
		self.sender.borrow().clone()
	}

	pub fn is_completed(&self) -> bool {
		self.sender.borrow().is_some()
	}

	/// Waits for the result.
	///
	/// # Errors
	///
	/// [`Error::Canceled`] when `ct` is cancelled first. Other waiters and the stored
	/// result are not affected.
	pub async fn wait(&self, ct: &CancellationToken) -> Result<MigrationResult> {
		let mut receiver = self.sender.subscribe();
		let completed = async move {
			receiver
				.wait_for(Option::is_some)
				.await
				.map(|slot| slot.clone())
		};
		tokio::select! {
			biased;
			_ = ct.cancelled() => Err(Error::Canceled),
			slot = completed => match slot {
				Ok(Some(result)) => Ok(result),
				_ => Err(Error::InvalidOperation(
					"Migration signal closed without a result.".to_string(),
				)),
			},
		}
	}
}

impl Default for MigrationSignal {
	fn default() -> Self {
		Self::new()
	}
}
