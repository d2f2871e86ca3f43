//! PostgreSQL password file lookup
//!
//! Each non-comment line reads `hostname:port:database:username:password`. Any of the
//! first four fields may be `*`. `\:` and `\\` escape a colon and a backslash.

use super::SettingsError;
use std::path::Path;

/// Connection coordinates matched against password file entries.
#[derive(Debug, Clone, Copy)]
pub struct PassTarget<'a> {
	pub host: &'a str,
	pub port: u16,
	pub database: &'a str,
	pub username: &'a str,
}

/// Returns the password of the first matching entry.
///
/// # Examples
///
/// ```
/// use tidemark_conf::settings::pgpass::{PassTarget, lookup};
///
/// let contents = "# local\nlocalhost:5432:*:blog:s\\:cret\n*:*:*:*:fallback\n";
/// let target = PassTarget { host: "localhost", port: 5432, database: "blog", username: "blog" };
/// assert_eq!(lookup(contents, target).as_deref(), Some("s:cret"));
/// ```
pub fn lookup(contents: &str, target: PassTarget<'_>) -> Option<String> {
	let port = target.port.to_string();
	contents
		.lines()
		.map(str::trim_end)
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.filter_map(split_fields)
		.find(|fields| {
			matches(&fields[0], target.host)
				&& matches(&fields[1], &port)
				&& matches(&fields[2], target.database)
				&& matches(&fields[3], target.username)
		})
		.map(|mut fields| fields.swap_remove(4))
}

/// Reads `path` and looks up the password for `target`.
pub fn lookup_file(path: &Path, target: PassTarget<'_>) -> Result<Option<String>, SettingsError> {
	let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
		path: path.to_path_buf(),
		source,
	})?;
	Ok(lookup(&contents, target))
}

fn matches(pattern: &str, value: &str) -> bool {
	pattern == "*" || pattern == value
}

fn split_fields(line: &str) -> Option<Vec<String>> {
	let mut fields = Vec::with_capacity(5);
	let mut current = String::new();
	let mut chars = line.chars();
	while let Some(c) = chars.next() {
		match c {
			'\\' => {
				if let Some(escaped) = chars.next() {
					current.push(escaped);
				}
			}
			':' if fields.len() < 4 => fields.push(std::mem::take(&mut current)),
			_ => current.push(c),
		}
	}
	fields.push(current);
	(fields.len() == 5).then_some(fields)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	const TARGET: PassTarget<'static> = PassTarget {
		host: "db.internal",
		port: 5432,
		database: "blog",
		username: "writer",
	};

	#[rstest]
	#[case("db.internal:5432:blog:writer:exact", Some("exact"))]
	#[case("*:*:*:writer:any-host", Some("any-host"))]
	#[case("db.internal:6432:blog:writer:wrong-port", None)]
	#[case("db.internal:5432:blog:reader:wrong-user", None)]
	#[case("db.internal:5432:blog", None)]
	#[case("# db.internal:5432:blog:writer:commented", None)]
	fn test_lookup_single_line(#[case] contents: &str, #[case] expected: Option<&str>) {
		assert_eq!(lookup(contents, TARGET).as_deref(), expected);
	}

	#[rstest]
	fn test_first_match_wins() {
		// Arrange
		let contents = "*:*:*:*:first\ndb.internal:5432:blog:writer:second\n";

		// Act
		let password = lookup(contents, TARGET);

		// Assert
		assert_eq!(password.as_deref(), Some("first"));
	}

	#[rstest]
	fn test_escaped_backslash_and_colon() {
		let contents = r"db.internal:5432:blog:writer:a\\b\:c";

		assert_eq!(lookup(contents, TARGET).as_deref(), Some(r"a\b:c"));
	}

	#[rstest]
	fn test_lookup_file_reports_missing_file() {
		let dir = tempfile::tempdir().unwrap();

		let result = lookup_file(&dir.path().join("missing.pgpass"), TARGET);

		assert!(matches!(result, Err(SettingsError::Io { .. })));
	}
}
