//! Pool configuration

use crate::backends::postgres::PostgresDriver;
use crate::connector::ResilientConnector;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tidemark_conf::PostgresSettings;
use tidemark_core::{Error, Result};

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct PoolConfig {
	pub min_connections: u32,
	pub max_connections: u32,
	pub acquire_timeout: Duration,
	pub idle_timeout: Option<Duration>,
	pub test_before_acquire: bool,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			min_connections: 0,
			max_connections: 100,
			acquire_timeout: Duration::from_secs(15),
			idle_timeout: Some(Duration::from_secs(300)),
			test_before_acquire: false,
		}
	}
}

impl PoolConfig {
	/// Create a new pool configuration with default values
	///
	/// # Examples
	///
	/// ```rust
	/// use tidemark_db::pool::PoolConfig;
	///
	/// let config = PoolConfig::new();
	/// assert_eq!(config.max_connections, 100);
	/// ```
	pub fn new() -> Self {
		Self::default()
	}

	/// Pool limits taken from connection settings.
	pub fn from_settings(settings: &PostgresSettings) -> Self {
		Self {
			min_connections: settings.min_pool_size,
			max_connections: settings.max_pool_size,
			acquire_timeout: settings.connect_timeout(),
			idle_timeout: Some(settings.idle_lifetime()),
			test_before_acquire: false,
		}
	}

	pub fn with_max_connections(mut self, max: u32) -> Self {
		self.max_connections = max;
		self
	}

	pub fn with_min_connections(mut self, min: u32) -> Self {
		self.min_connections = min;
		self
	}

	pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
		self.acquire_timeout = timeout;
		self
	}

	pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.idle_timeout = timeout;
		self
	}

	pub fn with_test_before_acquire(mut self, test: bool) -> Self {
		self.test_before_acquire = test;
		self
	}

	pub fn validate(&self) -> std::result::Result<(), String> {
		if self.max_connections < self.min_connections {
			return Err("max_connections must be >= min_connections".to_string());
		}
		Ok(())
	}

	fn pool_options(&self) -> PgPoolOptions {
		PgPoolOptions::new()
			.min_connections(self.min_connections)
			.max_connections(self.max_connections)
			.acquire_timeout(self.acquire_timeout)
			.idle_timeout(self.idle_timeout)
			.test_before_acquire(self.test_before_acquire)
	}
}

/// Connect options for `settings`, with the password resolved from its source.
pub fn connect_options(settings: &PostgresSettings) -> Result<PgConnectOptions> {
	let mut options = PgConnectOptions::new()
		.host(&settings.host)
		.port(settings.port)
		.username(&settings.username)
		.database(&settings.database);
	let password = settings
		.resolve_password()
		.map_err(|e| Error::Other(e.into()))?;
	if let Some(password) = password {
		options = options.password(&password);
	}
	if let Some(search_path) = &settings.search_path {
		options = options.options([("search_path", search_path.as_str())]);
	}
	Ok(options)
}

/// Builds a driver whose pool connects on first use.
///
/// Settings are validated first; nothing is dialed until a transaction begins. Must be
/// called within a Tokio runtime.
pub fn connect_lazy(settings: &PostgresSettings) -> Result<PostgresDriver> {
	settings.validate().map_err(|e| Error::Other(e.into()))?;
	let config = PoolConfig::from_settings(settings);
	config.validate().map_err(Error::InvalidOperation)?;
	let pool = config
		.pool_options()
		.connect_lazy_with(connect_options(settings)?);
	tracing::debug!(
		url = %settings.masked_url(),
		min = config.min_connections,
		max = config.max_connections,
		"Created lazy PostgreSQL pool"
	);
	Ok(PostgresDriver::new(pool))
}

/// Lazily connecting [`ResilientConnector`] carrying the default access and query
/// timeout of `settings`.
pub fn connector(settings: &PostgresSettings) -> Result<ResilientConnector> {
	let driver = connect_lazy(settings)?;
	Ok(ResilientConnector::new(Arc::new(driver))
		.with_default_access(settings.default_access)
		.with_default_timeout(settings.query_timeout()))
}
