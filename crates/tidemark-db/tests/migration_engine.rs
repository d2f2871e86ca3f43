//! Migration engine over the scripted driver

use async_trait::async_trait;
use rstest::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tidemark_core::{DriverError, Result};
use tidemark_db::ResilientConnector;
use tidemark_db::migrations::{
	Migration, MigrationEngine, MigrationPlan, MigrationResult, MigrationSignal,
};
use tidemark_db::transaction::{RwTransaction, SqlWrite, TransactionProvider};
use tidemark_test::driver::{ProgressTable, ScriptedDriver};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CreatePosts;

#[async_trait]
impl Migration for CreatePosts {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
		tx.execute("create table posts(id integer primary key)", &[], ct)
			.await
	}
}

#[derive(Default)]
struct SeedPosts;

#[async_trait]
impl Migration for SeedPosts {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
		tx.execute("insert into posts(id) values (1)", &[], ct).await
	}
}

/// Asserts that the author column exists; `applied` stands in for the catalog.
struct AddAuthor {
	applied: Arc<AtomicBool>,
}

#[async_trait]
impl Migration for AddAuthor {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
		tx.execute("alter table posts add column author text", &[], ct)
			.await?;
		self.applied.store(true, Ordering::SeqCst);
		Ok(())
	}

	async fn assert(
		&self,
		_tx: &mut RwTransaction<'_>,
		_ct: &CancellationToken,
	) -> Result<Option<String>> {
		Ok((!self.applied.load(Ordering::SeqCst)).then(|| "Column author is missing.".to_string()))
	}

	fn has_assertion() -> bool {
		true
	}

	fn assertion_must_initially_fail() -> bool {
		true
	}
}

/// Claims to be in place before it ran.
#[derive(Default)]
struct AlreadyThere;

#[async_trait]
impl Migration for AlreadyThere {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
		tx.execute("create index posts_author on posts(author)", &[], ct)
			.await
	}

	fn has_assertion() -> bool {
		true
	}

	fn assertion_must_initially_fail() -> bool {
		true
	}
}

/// Never satisfies its own assertion.
#[derive(Default)]
struct NeverRight;

#[async_trait]
impl Migration for NeverRight {
	async fn apply(&self, _tx: &mut RwTransaction<'_>, _ct: &CancellationToken) -> Result<()> {
		Ok(())
	}

	async fn assert(
		&self,
		_tx: &mut RwTransaction<'_>,
		_ct: &CancellationToken,
	) -> Result<Option<String>> {
		Ok(Some("Index is missing.".to_string()))
	}

	fn has_assertion() -> bool {
		true
	}
}

struct Harness {
	driver: ScriptedDriver,
	table: ProgressTable,
}

impl Harness {
	fn engine(&self, plan: MigrationPlan) -> MigrationEngine {
		let connector = ResilientConnector::new(Arc::new(self.driver.clone()));
		let provider = TransactionProvider::new(Arc::new(connector));
		MigrationEngine::new(provider, Arc::new(plan), MigrationSignal::new())
	}

	fn count(&self, sql: &str) -> usize {
		self.driver
			.statements()
			.iter()
			.filter(|statement| statement.as_str() == sql)
			.count()
	}
}

#[fixture]
fn harness() -> Harness {
	tidemark_test::init_test_logging();
	let driver = ScriptedDriver::new();
	let table = ProgressTable::install(&driver, "blog");
	Harness { driver, table }
}

fn blog_plan() -> MigrationPlan {
	MigrationPlan::builder("Blog")
		.add::<CreatePosts>()
		.add::<SeedPosts>()
		.build()
		.unwrap()
}

#[rstest]
#[tokio::test]
async fn test_applies_plan_in_order(harness: Harness) {
	// Arrange
	let engine = harness.engine(blog_plan());

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	assert_eq!(result, MigrationResult::Succeeded);
	assert_eq!(engine.signal().result(), Some(MigrationResult::Succeeded));
	assert_eq!(
		harness.table.records(),
		vec![(0, "CreatePosts".to_string()), (1, "SeedPosts".to_string())]
	);
	assert!(!engine.stop_token().is_cancelled());
	assert_eq!(harness.driver.open_connections(), 0);
}

#[rstest]
#[tokio::test]
async fn test_resumes_after_last_applied(harness: Harness) {
	// Arrange
	harness.table.seed(0, "CreatePosts");
	let engine = harness.engine(blog_plan());

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	assert_eq!(result, MigrationResult::Succeeded);
	assert_eq!(harness.count("create table posts(id integer primary key)"), 0);
	assert_eq!(harness.count("insert into posts(id) values (1)"), 1);
	assert_eq!(harness.table.ids(), vec!["CreatePosts", "SeedPosts"]);
}

#[rstest]
#[tokio::test]
async fn test_fully_applied_plan_changes_nothing(harness: Harness) {
	// Arrange
	harness.table.seed(0, "CreatePosts");
	harness.table.seed(1, "SeedPosts");
	let engine = harness.engine(blog_plan());

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	assert_eq!(result, MigrationResult::Succeeded);
	assert_eq!(harness.table.records().len(), 2);
	assert_eq!(harness.count("insert into posts(id) values (1)"), 0);
}

#[rstest]
#[tokio::test]
async fn test_serialization_failure_is_retried(harness: Harness) {
	// Arrange
	harness.driver.fail_on(
		r#"insert into "blog".migrations"#,
		DriverError::server(Some("40001".to_string()), "could not serialize access"),
	);
	let engine = harness.engine(blog_plan());

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	assert_eq!(result, MigrationResult::Succeeded);
	assert_eq!(harness.count("create table posts(id integer primary key)"), 2);
	assert_eq!(harness.table.ids(), vec!["CreatePosts", "SeedPosts"]);
}

#[rstest]
#[tokio::test]
async fn test_pretest_then_assertion_pass(harness: Harness) {
	// Arrange
	let applied = Arc::new(AtomicBool::new(false));
	let flag = applied.clone();
	let plan = MigrationPlan::builder("blog")
		.add::<CreatePosts>()
		.add_with(move || AddAuthor {
			applied: flag.clone(),
		})
		.build()
		.unwrap();
	let engine = harness.engine(plan);

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	assert_eq!(result, MigrationResult::Succeeded);
	assert!(applied.load(Ordering::SeqCst));
	assert_eq!(harness.table.ids(), vec!["CreatePosts", "AddAuthor"]);
}

#[rstest]
#[tokio::test]
async fn test_pretest_without_problem_is_fatal(harness: Harness) {
	// Arrange
	let plan = MigrationPlan::builder("blog")
		.add::<CreatePosts>()
		.add::<AlreadyThere>()
		.build()
		.unwrap();
	let engine = harness.engine(plan);

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	match &result {
		MigrationResult::Failed(info) => {
			assert!(info.starts_with("Migration 'AlreadyThere' failed."));
			assert!(info.contains("Pretest of migration 'AlreadyThere' ended without error."));
		}
		other => panic!("expected failure, got {:?}", other),
	}
	assert_eq!(harness.count("create index posts_author on posts(author)"), 0);
	assert_eq!(harness.table.ids(), vec!["CreatePosts"]);
	assert!(engine.stop_token().is_cancelled());
	assert_eq!(engine.signal().result(), Some(result));
	assert_eq!(harness.driver.open_connections(), 0);
}

#[rstest]
#[tokio::test]
async fn test_failed_assertion_is_fatal(harness: Harness) {
	// Arrange
	let plan = MigrationPlan::builder("blog")
		.add::<NeverRight>()
		.build()
		.unwrap();
	let engine = harness.engine(plan);

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	match result {
		MigrationResult::Failed(info) => assert!(
			info.contains("Assertion of migration 'NeverRight' failed: Index is missing.")
		),
		other => panic!("expected failure, got {:?}", other),
	}
	assert!(harness.table.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_unknown_progress_record_fails_read_stage(harness: Harness) {
	// Arrange
	harness.table.seed(0, "DroppedMigration");
	let engine = harness.engine(blog_plan());

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	match result {
		MigrationResult::Failed(info) => {
			assert!(info.starts_with("Migration stage 'read progress' failed."));
			assert!(info.contains(
				"Last migration that is registered in database as 'DroppedMigration' at '0' is not known."
			));
		}
		other => panic!("expected failure, got {:?}", other),
	}
	assert!(engine.stop_token().is_cancelled());
}

#[rstest]
#[tokio::test]
async fn test_cancellation_publishes_canceled(harness: Harness) {
	// Arrange
	let engine = harness.engine(blog_plan());
	let ct = CancellationToken::new();
	ct.cancel();

	// Act
	let result = engine.run(&ct).await;

	// Assert
	assert_eq!(result, MigrationResult::Canceled);
	assert_eq!(engine.signal().result(), Some(MigrationResult::Canceled));
	assert!(!engine.stop_token().is_cancelled());
	assert!(harness.table.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn test_spawned_engine_completes_signal(harness: Harness) {
	// Arrange
	let engine = harness.engine(blog_plan());
	let signal = engine.signal().clone();

	// Act
	let task = engine.spawn(CancellationToken::new());
	let awaited = signal.wait(&CancellationToken::new()).await.unwrap();

	// Assert
	assert_eq!(awaited, MigrationResult::Succeeded);
	assert_eq!(task.await.unwrap(), MigrationResult::Succeeded);
}

#[rstest]
#[tokio::test]
async fn test_script_migration_runs_file_contents(harness: Harness) {
	// Arrange
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(
		dir.path().join("0002_posts_title.sql"),
		"alter table posts add column title text;",
	)
	.unwrap();
	let plan = MigrationPlan::builder("blog")
		.script_base_path(dir.path())
		.add::<CreatePosts>()
		.add_script("0002_posts_title.sql")
		.build()
		.unwrap();
	let engine = harness.engine(plan);

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	assert_eq!(result, MigrationResult::Succeeded);
	assert_eq!(harness.count("alter table posts add column title text;"), 1);
	assert_eq!(harness.table.ids(), vec!["CreatePosts", "0002_posts_title"]);
}

#[rstest]
#[tokio::test]
async fn test_missing_script_is_fatal(harness: Harness) {
	// Arrange
	let dir = tempfile::tempdir().unwrap();
	let plan = MigrationPlan::builder("blog")
		.script_base_path(dir.path())
		.add_script("0001_missing.sql")
		.build()
		.unwrap();
	let engine = harness.engine(plan);

	// Act
	let result = engine.run(&CancellationToken::new()).await;

	// Assert
	match result {
		MigrationResult::Failed(info) => {
			assert!(info.starts_with("Migration '0001_missing' failed."));
			assert!(info.contains("Failed to read migration script"));
		}
		other => panic!("expected failure, got {:?}", other),
	}
}
