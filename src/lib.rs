//! # Tidemark
//!
//! Transaction scopes and serialized schema migrations for PostgreSQL.
//!
//! Tidemark sits between a service and its database driver:
//!
//! - **Resilient begin**: transient failures while starting a transaction are retried
//!   on a fixed schedule before they reach the caller
//! - **Transaction scopes**: one lazily started transaction per unit of work, widened
//!   from unspecified to read-write or read-only on demand
//! - **Typed capabilities**: read-only transactions expose no write statements
//! - **Migrations**: code and script migrations applied one serializable transaction at
//!   a time, serialized across processes by an exclusive table lock
//! - **Error taxonomy**: driver failures are classified into conflicts, timeouts and
//!   generic database failures
//!
//! ## Feature Flags
//!
//! - `postgres` (default) - PostgreSQL driver built on `sqlx`
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemark::prelude::*;
//!
//! #[derive(Default)]
//! struct CreatePosts;
//!
//! #[async_trait]
//! impl Migration for CreatePosts {
//!     async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
//!         tx.execute("create table posts(id bigserial primary key, title text)", &[], ct)
//!             .await
//!     }
//! }
//!
//! # async fn example(settings: PostgresSettings) -> Result<()> {
//! let provider = TransactionProvider::new(Arc::new(tidemark::db::pool::connector(&settings)?));
//! let plan = MigrationPlan::builder("blog").add::<CreatePosts>().build()?;
//! let engine = MigrationEngine::new(provider, Arc::new(plan), MigrationSignal::new());
//!
//! let ct = CancellationToken::new();
//! let signal = engine.signal().clone();
//! engine.spawn(ct.clone());
//! assert_eq!(signal.wait(&ct).await?, MigrationResult::Succeeded);
//! # Ok(())
//! # }
//! ```

pub use tidemark_conf as conf;
pub use tidemark_core as core;
pub use tidemark_db as db;

pub use tidemark_conf::{PostgresSettings, SettingsError};
pub use tidemark_core::{
	AccessMode, Affect, Error, IsolationLevel, QueryValue, Result, Row, SqlConflict, SqlError,
};
pub use tidemark_db::{
	Migration, MigrationEngine, MigrationLock, MigrationPlan, MigrationResult, MigrationSignal,
	ResilientConnector, RoTransaction, RwTransaction, SqlCommit, SqlRead, SqlWrite,
	TransactionHandle, TransactionProvider, TransactionScope,
};

/// Everything a service needs to run transactions and migrations.
pub mod prelude {
	pub use crate::{
		AccessMode, Affect, Error, IsolationLevel, Migration, MigrationEngine, MigrationPlan,
		MigrationResult, MigrationSignal, PostgresSettings, QueryValue, ResilientConnector,
		Result, RoTransaction, Row, RwTransaction, SqlCommit, SqlRead, SqlWrite,
		TransactionHandle, TransactionProvider, TransactionScope,
	};
	pub use async_trait::async_trait;
	pub use tokio_util::sync::CancellationToken;
}
