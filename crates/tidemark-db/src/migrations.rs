//! # Migrations
//!
//! Ordered schema migrations, applied exactly once per database.
//!
//! ## Features
//!
//! - **Plan**: code migrations ([`Migration`]) and SQL scripts, validated up front
//! - **Progress**: append-only `"<schema>".migrations` table identifying the last
//!   applied migration by index and id
//! - **Lock**: exclusive lock on `"<schema>".migration_sync` so only one process
//!   migrates at a time
//! - **Engine**: serializable transaction per migration, pre and post assertions,
//!   retry on serialization failure
//! - **Signal**: completion result shared with every waiter
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tidemark_db::migrations::{MigrationEngine, MigrationPlan, MigrationResult, MigrationSignal};
//! use tidemark_db::transaction::TransactionProvider;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(provider: TransactionProvider) -> tidemark_core::Result<()> {
//! let plan = MigrationPlan::builder("blog")
//!     .script_base_path("migrations")
//!     .add_script("0001_create_posts.sql")
//!     .build()?;
//!
//! let signal = MigrationSignal::new();
//! let stop = CancellationToken::new();
//! MigrationEngine::new(provider, Arc::new(plan), signal.clone())
//!     .with_stop_token(stop.clone())
//!     .spawn(CancellationToken::new());
//!
//! match signal.wait(&CancellationToken::new()).await? {
//!     MigrationResult::Succeeded => println!("schema is up to date"),
//!     other => eprintln!("migration did not succeed: {}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod lock;
pub mod migration;
pub mod plan;
pub mod progress;
pub mod signal;

pub use engine::MigrationEngine;
pub use lock::MigrationLock;
pub use migration::{Migration, ScriptMigration};
pub use plan::{
	MigrationDescriptor, MigrationFactory, MigrationKind, MigrationPlan, MigrationPlanBuilder,
};
pub use progress::ProgressRecord;
pub use signal::{MigrationResult, MigrationSignal};
