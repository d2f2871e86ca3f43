//! Common type definitions shared by drivers, transactions and migrations

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
	ReadUncommitted,
	ReadCommitted,
	RepeatableRead,
	Serializable,
}

impl IsolationLevel {
	/// Convert isolation level to SQL string
	///
	/// # Examples
	///
	/// ```
	/// use tidemark_core::IsolationLevel;
	///
	/// assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
	/// assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
	/// ```
	pub fn to_sql(&self) -> &'static str {
		match self {
			IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
			IsolationLevel::ReadCommitted => "READ COMMITTED",
			IsolationLevel::RepeatableRead => "REPEATABLE READ",
			IsolationLevel::Serializable => "SERIALIZABLE",
		}
	}
}

impl fmt::Display for IsolationLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.to_sql())
	}
}

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
	#[serde(rename = "rw")]
	ReadWrite,
	#[serde(rename = "ro")]
	ReadOnly,
}

impl AccessMode {
	/// Statement that switches the current transaction to this access mode.
	///
	/// # Examples
	///
	/// ```
	/// use tidemark_core::AccessMode;
	///
	/// assert_eq!(AccessMode::ReadWrite.set_transaction_sql(), "set transaction read write");
	/// assert_eq!(AccessMode::ReadOnly.set_transaction_sql(), "set transaction read only");
	/// ```
	pub fn set_transaction_sql(&self) -> &'static str {
		match self {
			AccessMode::ReadWrite => "set transaction read write",
			AccessMode::ReadOnly => "set transaction read only",
		}
	}

	pub fn opposite(&self) -> AccessMode {
		match self {
			AccessMode::ReadWrite => AccessMode::ReadOnly,
			AccessMode::ReadOnly => AccessMode::ReadWrite,
		}
	}
}

impl fmt::Display for AccessMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AccessMode::ReadWrite => f.write_str("read-write"),
			AccessMode::ReadOnly => f.write_str("read-only"),
		}
	}
}

/// Expected number of rows a statement affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affect {
	#[default]
	Any,
	SingleRow,
	AtLeastOneRow,
}

impl Affect {
	/// Describes the violation when `affected` does not satisfy the expectation.
	///
	/// # Examples
	///
	/// ```
	/// use tidemark_core::Affect;
	///
	/// assert_eq!(Affect::Any.violation(0), None);
	/// assert_eq!(
	///     Affect::SingleRow.violation(2).as_deref(),
	///     Some("Expected query to affect single row, but affected 2 rows.")
	/// );
	/// ```
	pub fn violation(&self, affected: u64) -> Option<String> {
		match self {
			Affect::SingleRow if affected != 1 => Some(format!(
				"Expected query to affect single row, but affected {} rows.",
				affected
			)),
			Affect::AtLeastOneRow if affected < 1 => Some(format!(
				"Expected query to affect at least one row, but affected {} rows.",
				affected
			)),
			_ => None,
		}
	}
}

/// Query value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
	Bytes(Vec<u8>),
	Timestamp(chrono::DateTime<chrono::Utc>),
	Uuid(Uuid),
}

impl From<&str> for QueryValue {
	fn from(s: &str) -> Self {
		QueryValue::String(s.to_string())
	}
}

impl From<String> for QueryValue {
	fn from(s: String) -> Self {
		QueryValue::String(s)
	}
}

impl From<i64> for QueryValue {
	fn from(i: i64) -> Self {
		QueryValue::Int(i)
	}
}

impl From<i32> for QueryValue {
	fn from(i: i32) -> Self {
		QueryValue::Int(i as i64)
	}
}

impl From<usize> for QueryValue {
	fn from(i: usize) -> Self {
		QueryValue::Int(i as i64)
	}
}

impl From<f64> for QueryValue {
	fn from(f: f64) -> Self {
		QueryValue::Float(f)
	}
}

impl From<bool> for QueryValue {
	fn from(b: bool) -> Self {
		QueryValue::Bool(b)
	}
}

impl From<chrono::DateTime<chrono::Utc>> for QueryValue {
	fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
		QueryValue::Timestamp(dt)
	}
}

impl From<Uuid> for QueryValue {
	fn from(u: Uuid) -> Self {
		QueryValue::Uuid(u)
	}
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
	fn from(value: Option<T>) -> Self {
		value.map_or(QueryValue::Null, Into::into)
	}
}

/// Failure reading a value out of a [`Row`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
	#[error("Column not found: {0}")]
	ColumnNotFound(String),

	#[error("Type error: {0}")]
	TypeError(String),
}

/// Row from query result. Columns keep the order the server returned them in.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
	pub data: IndexMap<String, QueryValue>,
}

impl Row {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, key: impl Into<String>, value: QueryValue) {
		self.data.insert(key.into(), value);
	}

	/// Builder-style insert, mostly useful for fixtures.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
		self.insert(key, value.into());
		self
	}

	/// Typed column access.
	///
	/// # Examples
	///
	/// ```
	/// use tidemark_core::Row;
	///
	/// let row = Row::new().with("index", 3i64).with("id", "CreatePostsTable");
	/// assert_eq!(row.get::<i64>("index").unwrap(), 3);
	/// assert_eq!(row.get::<String>("id").unwrap(), "CreatePostsTable");
	/// assert!(row.get::<i64>("missing").is_err());
	/// ```
	pub fn get<T>(&self, key: &str) -> Result<T, RowError>
	where
		T: TryFrom<QueryValue, Error = RowError>,
	{
		self.data
			.get(key)
			.cloned()
			.ok_or_else(|| RowError::ColumnNotFound(key.to_string()))
			.and_then(T::try_from)
	}

	/// Typed access to a nullable column; `NULL` reads as `None`.
	pub fn get_optional<T>(&self, key: &str) -> Result<Option<T>, RowError>
	where
		T: TryFrom<QueryValue, Error = RowError>,
	{
		match self.data.get(key) {
			None => Err(RowError::ColumnNotFound(key.to_string())),
			Some(QueryValue::Null) => Ok(None),
			Some(value) => T::try_from(value.clone()).map(Some),
		}
	}

	/// Value of the first column, if any.
	pub fn first_value(&self) -> Option<&QueryValue> {
		self.data.get_index(0).map(|(_, value)| value)
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

// Type conversions for QueryValue
impl TryFrom<QueryValue> for i64 {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Int(i) => Ok(i),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to i64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for i32 {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Int(i) => i32::try_from(i)
				.map_err(|_| RowError::TypeError(format!("Value {} out of range for i32", i))),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to i32",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for usize {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Int(i) => usize::try_from(i)
				.map_err(|_| RowError::TypeError(format!("Value {} out of range for usize", i))),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to usize",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for f64 {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Float(f) => Ok(f),
			QueryValue::Int(i) => Ok(i as f64),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to f64",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for bool {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Bool(b) => Ok(b),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to bool",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for String {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::String(s) => Ok(s),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to String",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for Uuid {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Uuid(u) => Ok(u),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to Uuid",
				value
			))),
		}
	}
}

impl TryFrom<QueryValue> for chrono::DateTime<chrono::Utc> {
	type Error = RowError;

	fn try_from(value: QueryValue) -> Result<Self, Self::Error> {
		match value {
			QueryValue::Timestamp(dt) => Ok(dt),
			_ => Err(RowError::TypeError(format!(
				"Cannot convert {:?} to DateTime<Utc>",
				value
			))),
		}
	}
}
