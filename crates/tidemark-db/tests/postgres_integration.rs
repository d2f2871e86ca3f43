//! End-to-end tests against a PostgreSQL container
//!
//! Requires Docker.

#![cfg(feature = "postgres")]

use async_trait::async_trait;
use rstest::*;
use serial_test::serial;
use std::sync::Arc;
use tidemark_conf::PostgresSettings;
use tidemark_core::{Affect, IsolationLevel, Result};
use tidemark_db::migrations::{
	Migration, MigrationEngine, MigrationPlan, MigrationResult, MigrationSignal,
};
use tidemark_db::pool;
use tidemark_db::transaction::{RwTransaction, SqlRead, SqlWrite, TransactionProvider};
use tidemark_test::fixtures::{ContainerAsync, GenericImage, postgres_container};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CreateTable;

#[async_trait]
impl Migration for CreateTable {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
		tx.execute(
			"create table pgblog.posts(id bigint primary key, title text not null)",
			&[],
			ct,
		)
		.await
	}
}

#[derive(Default)]
struct InsertSeedRow;

#[async_trait]
impl Migration for InsertSeedRow {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
		tx.execute_affecting(
			"insert into pgblog.posts(id, title) values ($1, $2)",
			&[1i64.into(), "Hello".into()],
			Affect::SingleRow,
			ct,
		)
		.await
		.map(|_| ())
	}

	async fn assert(
		&self,
		tx: &mut RwTransaction<'_>,
		ct: &CancellationToken,
	) -> Result<Option<String>> {
		let count: i64 = tx
			.query_scalar("select count(*) from pgblog.posts", &[], ct)
			.await?;
		Ok((count != 1).then(|| format!("Expected one seed row, found {}.", count)))
	}

	fn has_assertion() -> bool {
		true
	}

	fn assertion_must_initially_fail() -> bool {
		true
	}
}

fn provider(settings: &PostgresSettings) -> TransactionProvider {
	TransactionProvider::new(Arc::new(pool::connector(settings).unwrap()))
}

fn plan() -> Arc<MigrationPlan> {
	Arc::new(
		MigrationPlan::builder("PgBlog")
			.add::<CreateTable>()
			.add::<InsertSeedRow>()
			.build()
			.unwrap(),
	)
}

#[rstest]
#[serial(postgres)]
#[tokio::test]
async fn test_concurrent_engines_apply_plan_once(
	#[future] postgres_container: (ContainerAsync<GenericImage>, PostgresSettings),
) {
	// Arrange
	tidemark_test::init_test_logging();
	let (_container, settings) = postgres_container.await;
	let plan = plan();
	let first = MigrationEngine::new(provider(&settings), plan.clone(), MigrationSignal::new());
	let second = MigrationEngine::new(provider(&settings), plan, MigrationSignal::new());

	// Act
	let ct = CancellationToken::new();
	let (first, second) = tokio::join!(first.spawn(ct.clone()), second.spawn(ct.clone()));

	// Assert
	assert_eq!(first.unwrap(), MigrationResult::Succeeded);
	assert_eq!(second.unwrap(), MigrationResult::Succeeded);
	let provider = provider(&settings);
	let mut handle = provider
		.begin_ro(IsolationLevel::ReadCommitted, &ct)
		.await
		.unwrap();
	let ids: Vec<String> = handle
		.query_rows("select id from pgblog.migrations order by index", &[], &ct)
		.await
		.unwrap()
		.iter()
		.map(|row| row.get("id").unwrap())
		.collect();
	assert_eq!(ids, vec!["CreateTable", "InsertSeedRow"]);
	let posts: i64 = handle
		.query_scalar("select count(*) from pgblog.posts", &[], &ct)
		.await
		.unwrap();
	assert_eq!(posts, 1);
	handle.dispose().await;
}

#[rstest]
#[serial(postgres)]
#[tokio::test]
async fn test_server_errors_are_classified(
	#[future] postgres_container: (ContainerAsync<GenericImage>, PostgresSettings),
) {
	// Arrange
	let (_container, settings) = postgres_container.await;
	let provider = provider(&settings);
	let ct = CancellationToken::new();
	provider
		.using(IsolationLevel::ReadCommitted, None, &ct, |tx| {
			let ct = ct.clone();
			Box::pin(async move {
				tx.execute_batch(
					"create table accounts(id bigint primary key);
insert into accounts(id) values (1)",
					&ct,
				)
				.await
				.map(|_| ())
			})
		})
		.await
		.unwrap();

	// Act
	let duplicate = provider
		.using(IsolationLevel::ReadCommitted, None, &ct, |tx| {
			let ct = ct.clone();
			Box::pin(async move {
				tx.execute("insert into accounts(id) values (1)", &[], &ct)
					.await
			})
		})
		.await;
	let mut scope = provider.scope();
	let mut tx = scope
		.want_ro(IsolationLevel::ReadCommitted, &ct)
		.await
		.unwrap();
	let read_only_write = tx
		.query_rows("insert into accounts(id) values (2) returning id", &[], &ct)
		.await;

	// Assert
	assert!(duplicate.unwrap_err().is_unique_violation());
	assert!(read_only_write.is_err());
	scope.dispose().await;
}

#[rstest]
#[serial(postgres)]
#[tokio::test]
async fn test_after_commit_callback_sees_committed_row(
	#[future] postgres_container: (ContainerAsync<GenericImage>, PostgresSettings),
) {
	// Arrange
	let (_container, settings) = postgres_container.await;
	let provider = provider(&settings);
	let ct = CancellationToken::new();
	let mut handle = provider
		.begin_rw(IsolationLevel::Serializable, &ct)
		.await
		.unwrap();
	handle
		.execute("create table events(id bigint primary key)", &[], &ct)
		.await
		.unwrap();
	let observed = Arc::new(parking_lot::Mutex::new(None));
	let slot = observed.clone();
	let reader = provider.clone();
	handle
		.on_committed_async(move || async move {
			let ct = CancellationToken::new();
			let mut tx = reader.begin_ro(IsolationLevel::ReadCommitted, &ct).await?;
			let count: i64 = tx.query_scalar("select count(*) from events", &[], &ct).await?;
			*slot.lock() = Some(count);
			tx.dispose().await;
			Ok::<(), anyhow::Error>(())
		})
		.unwrap();

	// Act
	handle.commit(&ct).await.unwrap();

	// Assert
	assert_eq!(*observed.lock(), Some(0));
}
