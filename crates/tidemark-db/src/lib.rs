//! # Tidemark Database
//!
//! Transaction lifecycle and schema migrations on top of a native database driver.
//!
//! ## Features
//!
//! ### Connector (`connector` module)
//!
//! - **Resilient begin**: transient failures while opening a connection or starting a
//!   transaction are retried on a fixed schedule
//! - **Default access**: an access mode requested by the caller overrides the default
//!
//! ### Transactions (`transaction` module)
//!
//! - **Handle**: one database transaction with commit, rollback and post-commit callbacks
//! - **Capabilities**: read, write and commit operations split into traits, so read-only
//!   work cannot reach write statements
//! - **Scope**: a lazily started transaction whose access is widened on demand
//! - **Provider**: begin shortcuts and a commit-or-rollback `using` helper
//!
//! ### Migrations (`migrations` module)
//!
//! - **Plan**: ordered, validated list of code and script migrations
//! - **Lock**: cross-process mutual exclusion through an exclusive table lock
//! - **Engine**: applies pending migrations one serializable transaction at a time
//! - **Signal**: one-shot completion result that services wait on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemark_conf::PostgresSettings;
//! use tidemark_core::IsolationLevel;
//! use tidemark_db::pool;
//! use tidemark_db::transaction::{SqlCommit, SqlWrite, TransactionProvider};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> tidemark_core::Result<()> {
//! let settings = PostgresSettings::from_file("tidemark.toml").expect("settings");
//! let provider = TransactionProvider::new(Arc::new(pool::connector(&settings)?));
//!
//! let ct = CancellationToken::new();
//! let mut tx = provider.begin_rw(IsolationLevel::ReadCommitted, &ct).await?;
//! tx.execute("insert into posts(title) values ($1)", &["Hello".into()], &ct)
//!     .await?;
//! tx.commit(&ct).await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod cancel;
pub mod connector;
pub mod migrations;
#[cfg(feature = "postgres")]
pub mod pool;
pub mod transaction;

pub use connector::ResilientConnector;
pub use migrations::{
	Migration, MigrationEngine, MigrationLock, MigrationPlan, MigrationResult, MigrationSignal,
};
pub use transaction::{
	RoTransaction, RwTransaction, SqlCommit, SqlRead, SqlWrite, TransactionHandle,
	TransactionProvider, TransactionScope,
};

pub use tidemark_core::{Error, Result, SqlConflict, SqlError};
