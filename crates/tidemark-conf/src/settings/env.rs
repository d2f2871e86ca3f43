//! Environment variable handling module

use super::SettingsError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable reader with prefix support
#[derive(Clone)]
pub struct Env {
	/// Optional prefix for environment variables (e.g., "TIDEMARK_POSTGRES_")
	pub prefix: Option<String>,
	lookup: Lookup,
}

impl Env {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self {
			prefix: None,
			lookup: Arc::new(|key| std::env::var(key).ok()),
		}
	}

	/// Reads a fixed set of variables instead of the process environment.
	///
	/// # Examples
	///
	/// ```
	/// use std::collections::HashMap;
	/// use tidemark_conf::Env;
	///
	/// let env = Env::from_map(HashMap::from([("APP_PORT".to_string(), "6432".to_string())]))
	///     .with_prefix("APP_");
	/// assert_eq!(env.parse::<u16>("PORT").unwrap(), Some(6432));
	/// assert_eq!(env.str("HOST"), None);
	/// ```
	pub fn from_map(vars: HashMap<String, String>) -> Self {
		Self {
			prefix: None,
			lookup: Arc::new(move |key| vars.get(key).cloned()),
		}
	}

	/// Set a prefix for all environment variable lookups
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = Some(prefix.into());
		self
	}

	/// Get the full key name with prefix
	fn get_key_name(&self, key: &str) -> String {
		match &self.prefix {
			Some(prefix) => format!("{}{}", prefix, key),
			None => key.to_string(),
		}
	}

	pub fn str(&self, key: &str) -> Option<String> {
		(self.lookup)(&self.get_key_name(key))
	}

	/// Parses a variable; a present but malformed value is an error.
	pub fn parse<T>(&self, key: &str) -> Result<Option<T>, SettingsError>
	where
		T: FromStr,
		T::Err: fmt::Display,
	{
		let full_key = self.get_key_name(key);
		match (self.lookup)(&full_key) {
			None => Ok(None),
			Some(value) => value
				.trim()
				.parse()
				.map(Some)
				.map_err(|e: T::Err| SettingsError::InvalidProperty {
					key: full_key,
					value,
					reason: e.to_string(),
				}),
		}
	}
}

impl Default for Env {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for Env {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Env").field("prefix", &self.prefix).finish()
	}
}
