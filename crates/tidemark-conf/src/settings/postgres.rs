//! PostgreSQL settings
//!
//! This module provides [`PostgresSettings`], the `[postgres]` section of a tidemark
//! settings file.

use super::SettingsError;
use super::env::Env;
use super::pgpass::{self, PassTarget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tidemark_core::AccessMode;

/// Prefix of the environment variables that override file settings.
pub const ENV_PREFIX: &str = "TIDEMARK_POSTGRES_";

fn default_port() -> u16 {
	5432
}

fn default_query_timeout() -> u64 {
	30
}

fn default_connection_timeout() -> u64 {
	15
}

fn default_max_pool_size() -> u32 {
	100
}

fn default_connection_idle_lifetime() -> u64 {
	300
}

/// Where the password comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordSource {
	Text(String),
	PassFile(PathBuf),
}

/// PostgreSQL connection settings
///
/// Timeouts and lifetimes are in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostgresSettings {
	pub database: String,

	pub host: String,

	#[serde(default = "default_port")]
	pub port: u16,

	pub username: String,

	/// Takes precedence over `passfile` when both are set
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub passfile: Option<PathBuf>,

	/// Statement timeout applied when a call does not pass its own
	#[serde(default = "default_query_timeout")]
	pub default_query_timeout: u64,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub search_path: Option<String>,

	/// Timeout for opening a connection
	#[serde(default = "default_connection_timeout")]
	pub connection_timeout: u64,

	#[serde(default)]
	pub min_pool_size: u32,

	#[serde(default = "default_max_pool_size")]
	pub max_pool_size: u32,

	/// Idle time after which a pooled connection is closed
	#[serde(default = "default_connection_idle_lifetime")]
	pub connection_idle_lifetime: u64,

	/// Access mode the server starts transactions with, when known
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_access: Option<AccessMode>,
}

#[derive(Deserialize)]
struct SettingsDocument {
	postgres: PostgresSettings,
}

impl PostgresSettings {
	/// Settings with every optional property at its default.
	///
	/// # Examples
	///
	/// ```
	/// use tidemark_conf::settings::PostgresSettings;
	///
	/// let settings = PostgresSettings::new("blog", "localhost", 5432, "blog").with_password("secret");
	/// assert_eq!(settings.default_query_timeout, 30);
	/// assert_eq!(settings.connection_timeout, 15);
	/// assert!(settings.validate().is_ok());
	/// ```
	pub fn new(
		database: impl Into<String>,
		host: impl Into<String>,
		port: u16,
		username: impl Into<String>,
	) -> Self {
		Self {
			database: database.into(),
			host: host.into(),
			port,
			username: username.into(),
			password: None,
			passfile: None,
			default_query_timeout: default_query_timeout(),
			search_path: None,
			connection_timeout: default_connection_timeout(),
			min_pool_size: 0,
			max_pool_size: default_max_pool_size(),
			connection_idle_lifetime: default_connection_idle_lifetime(),
			default_access: None,
		}
	}

	pub fn with_password(mut self, password: impl Into<String>) -> Self {
		self.password = Some(password.into());
		self
	}

	pub fn with_passfile(mut self, path: impl Into<PathBuf>) -> Self {
		self.passfile = Some(path.into());
		self
	}

	pub fn with_search_path(mut self, search_path: impl Into<String>) -> Self {
		self.search_path = Some(search_path.into());
		self
	}

	pub fn with_pool_size(mut self, min: u32, max: u32) -> Self {
		self.min_pool_size = min;
		self.max_pool_size = max;
		self
	}

	pub fn with_default_query_timeout(mut self, timeout: Duration) -> Self {
		self.default_query_timeout = timeout.as_secs();
		self
	}

	pub fn with_default_access(mut self, access: Option<AccessMode>) -> Self {
		self.default_access = access;
		self
	}

	/// Parses the `[postgres]` table of a TOML document and validates it.
	pub fn from_toml_str(document: &str) -> Result<Self, SettingsError> {
		let document: SettingsDocument = toml::from_str(document)?;
		document.postgres.validate()?;
		Ok(document.postgres)
	}

	/// Reads a TOML settings file, applies `TIDEMARK_POSTGRES_*` overrides and validates.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		let document: SettingsDocument = toml::from_str(&contents)?;
		let settings = document
			.postgres
			.with_env_overrides(&Env::new().with_prefix(ENV_PREFIX))?;
		settings.validate()?;
		tracing::debug!(url = %settings.masked_url(), "Loaded PostgreSQL settings");
		Ok(settings)
	}

	/// Overrides properties present in `env`.
	///
	/// Keys are the upper-cased property names, e.g. `HOST` or `MAX_POOL_SIZE`; the
	/// prefix is whatever `env` was built with.
	pub fn with_env_overrides(mut self, env: &Env) -> Result<Self, SettingsError> {
		if let Some(database) = env.str("DATABASE") {
			self.database = database;
		}
		if let Some(host) = env.str("HOST") {
			self.host = host;
		}
		if let Some(port) = env.parse("PORT")? {
			self.port = port;
		}
		if let Some(username) = env.str("USERNAME") {
			self.username = username;
		}
		if let Some(password) = env.str("PASSWORD") {
			self.password = Some(password);
		}
		if let Some(passfile) = env.str("PASSFILE") {
			self.passfile = Some(PathBuf::from(passfile));
		}
		if let Some(timeout) = env.parse("DEFAULT_QUERY_TIMEOUT")? {
			self.default_query_timeout = timeout;
		}
		if let Some(search_path) = env.str("SEARCH_PATH") {
			self.search_path = Some(search_path);
		}
		if let Some(timeout) = env.parse("CONNECTION_TIMEOUT")? {
			self.connection_timeout = timeout;
		}
		if let Some(size) = env.parse("MIN_POOL_SIZE")? {
			self.min_pool_size = size;
		}
		if let Some(size) = env.parse("MAX_POOL_SIZE")? {
			self.max_pool_size = size;
		}
		if let Some(lifetime) = env.parse("CONNECTION_IDLE_LIFETIME")? {
			self.connection_idle_lifetime = lifetime;
		}
		if let Some(access) = env.str("DEFAULT_ACCESS") {
			self.default_access = Some(parse_access(&access)?);
		}
		Ok(self)
	}

	/// Checks every property and reports all problems at once.
	pub fn validate(&self) -> Result<(), SettingsError> {
		let mut errors = Vec::new();

		for (name, value) in [
			("database", &self.database),
			("host", &self.host),
			("username", &self.username),
		] {
			if value.trim().is_empty() {
				errors.push(SettingsError::Invalid(format!("Property '{}' is empty.", name)));
			}
		}
		if self.port == 0 {
			errors.push(SettingsError::Invalid(format!(
				"Port is not positive: {}.",
				self.port
			)));
		}
		if self.max_pool_size < self.min_pool_size {
			errors.push(SettingsError::Invalid(format!(
				"Max pool size '{}' is less than min pool size '{}'.",
				self.max_pool_size, self.min_pool_size
			)));
		}
		if self.max_pool_size == 0 {
			errors.push(SettingsError::Invalid(
				"Max pool size must be positive.".to_string(),
			));
		}
		if self.password.is_none() && self.passfile.is_none() {
			errors.push(SettingsError::MissingProperty("password"));
		}

		match errors.len() {
			0 => Ok(()),
			1 => Err(errors.remove(0)),
			_ => Err(SettingsError::Multiple(errors)),
		}
	}

	pub fn password_source(&self) -> Option<PasswordSource> {
		match (&self.password, &self.passfile) {
			(Some(password), _) => Some(PasswordSource::Text(password.clone())),
			(None, Some(path)) => Some(PasswordSource::PassFile(path.clone())),
			(None, None) => None,
		}
	}

	/// Resolves the password, reading the password file if that is the source.
	pub fn resolve_password(&self) -> Result<Option<String>, SettingsError> {
		match self.password_source() {
			Some(PasswordSource::Text(password)) => Ok(Some(password)),
			Some(PasswordSource::PassFile(path)) => pgpass::lookup_file(
				&path,
				PassTarget {
					host: &self.host,
					port: self.port,
					database: &self.database,
					username: &self.username,
				},
			),
			None => Ok(None),
		}
	}

	pub fn query_timeout(&self) -> Duration {
		Duration::from_secs(self.default_query_timeout)
	}

	pub fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.connection_timeout)
	}

	pub fn idle_lifetime(&self) -> Duration {
		Duration::from_secs(self.connection_idle_lifetime)
	}

	/// Connection URL with the password masked, suitable for logs.
	pub fn masked_url(&self) -> String {
		let credentials = match self.password_source() {
			Some(_) => format!("{}:***", self.username),
			None => self.username.clone(),
		};
		format!(
			"postgresql://{}@{}:{}/{}",
			credentials, self.host, self.port, self.database
		)
	}
}

fn parse_access(value: &str) -> Result<AccessMode, SettingsError> {
	match value.trim() {
		"rw" => Ok(AccessMode::ReadWrite),
		"ro" => Ok(AccessMode::ReadOnly),
		other => Err(SettingsError::InvalidProperty {
			key: format!("{}DEFAULT_ACCESS", ENV_PREFIX),
			value: other.to_string(),
			reason: "expected 'rw' or 'ro'".to_string(),
		}),
	}
}
