//! Settings management
//!
//! - [`postgres`]: the `[postgres]` settings section
//! - [`env`]: prefixed environment variable lookup
//! - [`pgpass`]: password lookup in PostgreSQL password files

pub mod env;
pub mod pgpass;
pub mod postgres;

pub use env::Env;
pub use postgres::{PasswordSource, PostgresSettings};

use std::path::PathBuf;

/// Errors raised while loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
	#[error("Failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse settings: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("Property '{0}' is not found in 'postgres'.")]
	MissingProperty(&'static str),

	#[error("Property '{key}' = '{value}' is not valid: {reason}")]
	InvalidProperty {
		key: String,
		value: String,
		reason: String,
	},

	#[error("{0}")]
	Invalid(String),

	#[error("Multiple validation errors: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "))]
	Multiple(Vec<SettingsError>),
}
