//! PostgreSQL container fixtures
//!
//! Tests using these fixtures need Docker and should run with `#[serial]`.

use rstest::*;
use sqlx::Connection;
use std::time::Duration;
use tidemark_conf::PostgresSettings;
use testcontainers::{
	ImageExt,
	core::{IntoContainerPort, WaitFor},
	runners::AsyncRunner,
};

pub use testcontainers::{ContainerAsync, GenericImage};

const PASSWORD: &str = "postgres";
const MAX_RETRIES: u32 = 7;

/// Starts a PostgreSQL 16 container and returns it with settings pointing at it.
///
/// The container is stopped when the returned handle is dropped.
///
/// # Examples
///
/// ```no_run
/// use rstest::*;
/// use tidemark_test::fixtures::{ContainerAsync, GenericImage, postgres_container};
/// use tidemark_conf::PostgresSettings;
///
/// #[rstest]
/// #[tokio::test]
/// async fn test_with_database(
///     #[future] postgres_container: (ContainerAsync<GenericImage>, PostgresSettings),
/// ) {
///     let (_container, settings) = postgres_container.await;
///     assert_eq!(settings.database, "postgres");
/// }
/// ```
#[fixture]
pub async fn postgres_container() -> (ContainerAsync<GenericImage>, PostgresSettings) {
	let image = GenericImage::new("postgres", "16-alpine")
		.with_exposed_port(5432.tcp())
		.with_wait_for(WaitFor::message_on_stderr(
			"database system is ready to accept connections",
		))
		.with_startup_timeout(Duration::from_secs(120))
		.with_env_var("POSTGRES_PASSWORD", PASSWORD);

	let postgres = image
		.start()
		.await
		.expect("Failed to start PostgreSQL container");

	let mut port_retry = 0;
	let port = loop {
		match postgres.get_host_port_ipv4(5432).await {
			Ok(p) => break p,
			Err(e) if port_retry < MAX_RETRIES => {
				port_retry += 1;
				eprintln!(
					"PostgreSQL port query attempt {} of {} failed: {:?}",
					port_retry, MAX_RETRIES, e
				);
				tokio::time::sleep(backoff(port_retry)).await;
			}
			Err(e) => panic!(
				"Failed to get PostgreSQL port after {} retries: {}",
				MAX_RETRIES, e
			),
		}
	};

	let database_url = format!(
		"postgres://postgres:{}@localhost:{}/postgres?sslmode=disable",
		PASSWORD, port
	);
	wait_until_ready(&database_url).await;

	let settings =
		PostgresSettings::new("postgres", "localhost", port, "postgres").with_password(PASSWORD);
	(postgres, settings)
}

/// Retries a `SELECT 1` round trip until the server answers.
async fn wait_until_ready(database_url: &str) {
	let mut retry_count = 0;
	loop {
		let attempt = async {
			let mut connection = sqlx::PgConnection::connect(database_url).await?;
			sqlx::query("SELECT 1").execute(&mut connection).await?;
			connection.close().await
		};
		match attempt.await {
			Ok(()) => return,
			Err(e) if retry_count < MAX_RETRIES => {
				retry_count += 1;
				eprintln!(
					"PostgreSQL health check attempt {} of {} failed: {:?}",
					retry_count, MAX_RETRIES, e
				);
				tokio::time::sleep(backoff(retry_count)).await;
			}
			Err(e) => panic!(
				"PostgreSQL health check failed after {} retries: {}",
				MAX_RETRIES, e
			),
		}
	}
}

fn backoff(retry: u32) -> Duration {
	Duration::from_millis(200 * 2_u64.pow(retry))
}
