//! Migration progress
//!
//! The progress table `"<schema>".migrations` is append-only: one row per applied
//! migration, never updated or deleted. The row with the highest index names the last
//! applied migration.

use crate::migrations::plan::{MigrationDescriptor, MigrationPlan};
use crate::transaction::SqlWrite;
use tidemark_core::{Affect, Error, Result};
use tokio_util::sync::CancellationToken;

/// Last applied migration as persisted in the progress table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
	pub index: usize,
	pub id: String,
}

impl ProgressRecord {
	pub fn new(index: usize, id: impl Into<String>) -> Self {
		Self {
			index,
			id: id.into(),
		}
	}
}

pub(crate) fn create_table_sql(schema: &str) -> String {
	format!(
		r#"create schema if not exists "{schema}";
create table if not exists "{schema}".migrations(index integer not null unique, id text not null unique)"#
	)
}

pub(crate) fn select_last_sql(schema: &str) -> String {
	format!(r#"select index, id from "{schema}".migrations order by index desc limit 1"#)
}

pub(crate) fn insert_sql(schema: &str) -> String {
	format!(r#"insert into "{schema}".migrations(index, id) values ($1, $2)"#)
}

/// Reads the last applied migration, creating the progress table on first use.
pub async fn last_applied<T>(
	tx: &mut T,
	schema: &str,
	ct: &CancellationToken,
) -> Result<Option<ProgressRecord>>
where
	T: SqlWrite,
{
	tx.execute_batch(&create_table_sql(schema), ct).await?;
	let row = tx
		.query_first_row_optional(&select_last_sql(schema), &[], ct)
		.await?;
	match row {
		Some(row) => Ok(Some(ProgressRecord {
			index: row.get("index")?,
			id: row.get("id")?,
		})),
		None => Ok(None),
	}
}

/// Appends the progress record of `descriptor`.
pub async fn record_applied<T>(
	tx: &mut T,
	schema: &str,
	descriptor: &MigrationDescriptor,
	ct: &CancellationToken,
) -> Result<()>
where
	T: SqlWrite,
{
	tx.execute_affecting(
		&insert_sql(schema),
		&[descriptor.index().into(), descriptor.id().into()],
		Affect::SingleRow,
		ct,
	)
	.await
	.map(|_| ())
}

/// The migration following `last`, or `None` when the plan is fully applied.
///
/// # Errors
///
/// A migration failure when `last` does not match the plan.
pub fn next_descriptor<'a>(
	plan: &'a MigrationPlan,
	last: Option<&ProgressRecord>,
) -> Result<Option<&'a MigrationDescriptor>> {
	let Some(last) = last else {
		return Ok(plan.get(0));
	};
	match plan.find(&last.id) {
		Some(descriptor) if descriptor.index() != last.index => Err(Error::migration(format!(
			"Expected migration '{}' to be at '{}', but found at {} as last registered migration in database.",
			last.id,
			descriptor.index(),
			last.index
		))),
		Some(descriptor) => Ok(plan.get(descriptor.index() + 1)),
		None => Err(Error::migration(format!(
			"Last migration that is registered in database as '{}' at '{}' is not known.",
			last.id, last.index
		))),
	}
}
