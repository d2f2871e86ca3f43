//! Migration units

use crate::transaction::{RwTransaction, SqlWrite};
use async_trait::async_trait;
use std::borrow::Cow;
use tidemark_core::Result;
use tokio_util::sync::CancellationToken;

/// One schema change, applied inside a serializable read-write transaction.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use tidemark_core::Result;
/// use tidemark_db::migrations::Migration;
/// use tidemark_db::transaction::{RwTransaction, SqlRead, SqlWrite};
/// use tokio_util::sync::CancellationToken;
///
/// #[derive(Default)]
/// struct CreatePostsTable;
///
/// #[async_trait]
/// impl Migration for CreatePostsTable {
///     async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
///         tx.execute("create table posts(id serial primary key, title text not null)", &[], ct)
///             .await
///     }
///
///     async fn assert(
///         &self,
///         tx: &mut RwTransaction<'_>,
///         ct: &CancellationToken,
///     ) -> Result<Option<String>> {
///         let found = tx
///             .query_first_row_optional("select 1 from information_schema.tables where table_name = 'posts'", &[], ct)
///             .await?;
///         Ok(found.is_none().then(|| "Table posts is missing.".to_string()))
///     }
///
///     fn has_assertion() -> bool {
///         true
///     }
/// }
///
/// assert_eq!(CreatePostsTable::id(), "CreatePostsTable");
/// ```
#[async_trait]
pub trait Migration: Send + Sync {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()>;

	/// Checks the state this migration produces. `Some` describes what is wrong.
	///
	/// Only consulted when [`Migration::has_assertion`] is true.
	async fn assert(
		&self,
		_tx: &mut RwTransaction<'_>,
		_ct: &CancellationToken,
	) -> Result<Option<String>> {
		Ok(None)
	}

	/// Id persisted in the progress table. Defaults to the type name.
	fn id() -> Cow<'static, str>
	where
		Self: Sized,
	{
		Cow::Borrowed(short_type_name::<Self>())
	}

	fn has_assertion() -> bool
	where
		Self: Sized,
	{
		false
	}

	/// Whether the assertion has to report a problem before the migration runs.
	fn assertion_must_initially_fail() -> bool
	where
		Self: Sized,
	{
		false
	}
}

/// Migration backed by a SQL script.
#[derive(Debug, Clone)]
pub struct ScriptMigration {
	sql: String,
}

impl ScriptMigration {
	pub fn new(sql: impl Into<String>) -> Self {
		Self { sql: sql.into() }
	}

	pub fn sql(&self) -> &str {
		&self.sql
	}
}

#[async_trait]
impl Migration for ScriptMigration {
	async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
		tx.execute_batch(&self.sql, ct).await.map(|_| ())
	}
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
	let name = std::any::type_name::<T>();
	let base = name.split('<').next().unwrap_or(name);
	base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	struct AddAuthorColumn;

	#[async_trait]
	impl Migration for AddAuthorColumn {
		async fn apply(&self, _tx: &mut RwTransaction<'_>, _ct: &CancellationToken) -> Result<()> {
			Ok(())
		}
	}

	struct Renamed;

	#[async_trait]
	impl Migration for Renamed {
		async fn apply(&self, _tx: &mut RwTransaction<'_>, _ct: &CancellationToken) -> Result<()> {
			Ok(())
		}

		fn id() -> Cow<'static, str> {
			Cow::Borrowed("0002_rename_posts")
		}
	}

	#[rstest]
	fn test_default_id_is_type_name() {
		assert_eq!(AddAuthorColumn::id(), "AddAuthorColumn");
		assert!(!AddAuthorColumn::has_assertion());
		assert!(!AddAuthorColumn::assertion_must_initially_fail());
	}

	#[rstest]
	fn test_id_can_be_overridden() {
		assert_eq!(Renamed::id(), "0002_rename_posts");
	}

	#[rstest]
	fn test_short_type_name_strips_generics() {
		assert_eq!(short_type_name::<Vec<String>>(), "Vec");
		assert_eq!(short_type_name::<ScriptMigration>(), "ScriptMigration");
	}
}
