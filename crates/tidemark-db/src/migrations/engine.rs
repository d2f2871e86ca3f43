//! Migration engine
//!
//! Applies the pending migrations of a [`MigrationPlan`] while holding the schema's
//! [`MigrationLock`]. Each migration runs in its own serializable read-write
//! transaction together with its progress record:
//!
//! 1. read the last applied migration and pick the next one
//! 2. run the pretest when the migration has an assertion
//! 3. apply the migration and run the assertion again
//! 4. record progress and commit
//!
//! A serialization failure restarts the iteration with a fresh transaction. Any other
//! failure is terminal: the stop token is cancelled and the failure is published on
//! the [`MigrationSignal`].

use crate::migrations::lock::MigrationLock;
use crate::migrations::plan::{MigrationDescriptor, MigrationPlan};
use crate::migrations::progress;
use crate::migrations::signal::{MigrationResult, MigrationSignal};
use crate::transaction::{RwTransaction, SqlCommit, TransactionProvider};
use std::fmt;
use std::sync::Arc;
use tidemark_core::{Error, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// What a failure is attributed to.
#[derive(Debug, Clone)]
enum Subject {
	Migration(String),
	Stage(&'static str),
}

impl fmt::Display for Subject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Subject::Migration(id) => write!(f, "'{}'", id),
			Subject::Stage(stage) => write!(f, "stage '{}'", stage),
		}
	}
}

struct Failure {
	subject: Subject,
	error: Error,
}

impl Failure {
	fn stage(stage: &'static str) -> impl FnOnce(Error) -> Failure {
		move |error| Failure {
			subject: Subject::Stage(stage),
			error,
		}
	}

	fn migration(descriptor: &MigrationDescriptor) -> impl FnOnce(Error) -> Failure + '_ {
		move |error| Failure {
			subject: Subject::Migration(descriptor.id().to_string()),
			error,
		}
	}
}

enum Step {
	Applied,
	Completed,
}

/// Background task applying a [`MigrationPlan`].
#[derive(Debug)]
pub struct MigrationEngine {
	provider: TransactionProvider,
	plan: Arc<MigrationPlan>,
	signal: MigrationSignal,
	stop: CancellationToken,
}

impl MigrationEngine {
	pub fn new(
		provider: TransactionProvider,
		plan: Arc<MigrationPlan>,
		signal: MigrationSignal,
	) -> Self {
		Self {
			provider,
			plan,
			signal,
			stop: CancellationToken::new(),
		}
	}

	/// Token cancelled when a migration fails fatally; hosts shut down on it.
	pub fn with_stop_token(mut self, stop: CancellationToken) -> Self {
		self.stop = stop;
		self
	}

	pub fn stop_token(&self) -> &CancellationToken {
		&self.stop
	}

	pub fn signal(&self) -> &MigrationSignal {
		&self.signal
	}

	pub fn plan(&self) -> &MigrationPlan {
		&self.plan
	}

	/// Runs the engine on the Tokio runtime.
	pub fn spawn(self, ct: CancellationToken) -> JoinHandle<MigrationResult> {
		tokio::spawn(async move { self.run(&ct).await })
	}

	/// Applies every pending migration and publishes the outcome.
	pub async fn run(&self, ct: &CancellationToken) -> MigrationResult {
		let result = match self.migrate(ct).await {
			Ok(()) => {
				info!("Database migration completed.");
				MigrationResult::Succeeded
			}
			Err(failure) if failure.error.is_canceled() => {
				info!("Database migration canceled.");
				MigrationResult::Canceled
			}
			Err(Failure { subject, error }) => {
				error!(
					subject = %subject,
					error = ?error,
					"Migration {} failed. Service will be stopped.",
					subject
				);
				self.stop.cancel();
				MigrationResult::Failed(format!(
					"Migration {} failed.\n{:#}",
					subject,
					anyhow::Error::from(error)
				))
			}
		};
		if !self.signal.complete(result.clone()) {
			debug!("Migration result was already published");
		}
		result
	}

	async fn migrate(&self, ct: &CancellationToken) -> std::result::Result<(), Failure> {
		let lock = MigrationLock::acquire(&self.provider, self.plan.schema(), ct)
			.await
			.map_err(Failure::stage("acquire lock"))?;
		let outcome = self.apply_pending(ct).await;
		lock.release().await;
		outcome
	}

	async fn apply_pending(&self, ct: &CancellationToken) -> std::result::Result<(), Failure> {
		loop {
			let mut handle = self
				.provider
				.begin_rw_serializable(ct)
				.await
				.map_err(Failure::stage("begin transaction"))?;
			let step = match handle.as_read_write() {
				Ok(mut tx) => self.step(&mut tx, ct).await,
				Err(e) => Err(Failure::stage("begin transaction")(e)),
			};
			handle.dispose().await;

			match step {
				Ok(Step::Applied) => {}
				Ok(Step::Completed) => return Ok(()),
				Err(failure) if failure.error.is_serialization_failure() => {
					info!(
						subject = %failure.subject,
						"Migration {} had serialization failure. Trying again.",
						failure.subject
					);
				}
				Err(failure) => return Err(failure),
			}
		}
	}

	async fn step(
		&self,
		tx: &mut RwTransaction<'_>,
		ct: &CancellationToken,
	) -> std::result::Result<Step, Failure> {
		let schema = self.plan.schema();
		let last = progress::last_applied(tx, schema, ct)
			.await
			.map_err(Failure::stage("read progress"))?;
		let next = progress::next_descriptor(&self.plan, last.as_ref())
			.map_err(Failure::stage("read progress"))?;
		match next {
			Some(descriptor) => {
				self.apply(tx, descriptor, ct)
					.await
					.map_err(Failure::migration(descriptor))?;
				Ok(Step::Applied)
			}
			None => {
				tx.commit(ct)
					.await
					.map_err(Failure::stage("read progress"))?;
				Ok(Step::Completed)
			}
		}
	}

	async fn apply(
		&self,
		tx: &mut RwTransaction<'_>,
		descriptor: &MigrationDescriptor,
		ct: &CancellationToken,
	) -> Result<()> {
		let id = descriptor.id();
		info!(
			migration_id = id,
			"Run migration '{}' ({}/{}).",
			id,
			descriptor.index() + 1,
			self.plan.len()
		);
		let migration = descriptor
			.instantiate(self.plan.script_base_path())
			.await?;

		if descriptor.has_assertion() {
			match migration.assert(tx, ct).await? {
				None if descriptor.assertion_must_initially_fail() => {
					return Err(Error::migration(format!(
						"Pretest of migration '{}' ended without error.",
						id
					)));
				}
				None => {}
				Some(problem) => info!(
					migration_id = id,
					problem = %problem,
					"Pretest of migration '{}' ended with error.",
					id
				),
			}
		}

		migration.apply(tx, ct).await?;

		if descriptor.has_assertion() {
			if let Some(problem) = migration.assert(tx, ct).await? {
				return Err(Error::migration(format!(
					"Assertion of migration '{}' failed: {}",
					id, problem
				)));
			}
		}

		progress::record_applied(tx, self.plan.schema(), descriptor, ct).await?;
		tx.commit(ct).await?;
		info!(migration_id = id, "Migration '{}' completed.", id);
		Ok(())
	}
}
