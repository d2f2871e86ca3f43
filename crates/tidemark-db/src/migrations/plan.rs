//! Migration plan and descriptors
//!
//! A [`MigrationPlan`] is the ordered list of migrations for one schema. It is built
//! once per process and validated as a whole: every problem found while building is
//! reported together.

use crate::migrations::migration::{Migration, ScriptMigration};
use anyhow::Context;
use std::any::type_name;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidemark_core::{Error, Result};

/// Creates a fresh instance of a code migration.
pub type MigrationFactory = Arc<dyn Fn() -> Box<dyn Migration> + Send + Sync>;

/// How a migration is defined.
#[derive(Clone)]
pub enum MigrationKind {
	Code {
		type_name: &'static str,
		factory: MigrationFactory,
	},
	/// SQL script, relative to the plan's script base path.
	Script { location: PathBuf },
}

impl fmt::Debug for MigrationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MigrationKind::Code { type_name, .. } => {
				f.debug_struct("Code").field("type_name", type_name).finish()
			}
			MigrationKind::Script { location } => {
				f.debug_struct("Script").field("location", location).finish()
			}
		}
	}
}

impl fmt::Display for MigrationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MigrationKind::Code { type_name, .. } => write!(f, "type {}", type_name),
			MigrationKind::Script { location } => write!(f, "script {}", location.display()),
		}
	}
}

/// One migration of a plan.
#[derive(Debug, Clone)]
pub struct MigrationDescriptor {
	index: usize,
	id: String,
	kind: MigrationKind,
	has_assertion: bool,
	assertion_must_initially_fail: bool,
}

impl MigrationDescriptor {
	/// Zero-based position in the plan.
	pub fn index(&self) -> usize {
		self.index
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn kind(&self) -> &MigrationKind {
		&self.kind
	}

	pub fn has_assertion(&self) -> bool {
		self.has_assertion
	}

	pub fn assertion_must_initially_fail(&self) -> bool {
		self.assertion_must_initially_fail
	}

	/// Creates the migration; scripts are read from `script_base_path`.
	pub async fn instantiate(&self, script_base_path: &Path) -> Result<Box<dyn Migration>> {
		match &self.kind {
			MigrationKind::Code { factory, .. } => Ok(factory()),
			MigrationKind::Script { location } => {
				let path = script_base_path.join(location);
				let sql = tokio::fs::read_to_string(&path)
					.await
					.with_context(|| format!("Failed to read migration script {}", path.display()))?;
				Ok(Box::new(ScriptMigration::new(sql)))
			}
		}
	}
}

/// Ordered, validated migrations of one schema.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
	id: String,
	schema: String,
	script_base_path: PathBuf,
	descriptors: Vec<MigrationDescriptor>,
}

impl MigrationPlan {
	/// Starts a plan. The schema name is `id` lowercased.
	///
	/// # Examples
	///
	/// ```
	/// use tidemark_db::migrations::MigrationPlan;
	///
	/// let plan = MigrationPlan::builder("Blog")
	///     .script_base_path("migrations")
	///     .add_script("0001_create_posts.sql")
	///     .add_script_with_id("seed", "0002_seed_posts.sql")
	///     .build()
	///     .unwrap();
	///
	/// assert_eq!(plan.schema(), "blog");
	/// assert_eq!(plan.get(0).unwrap().id(), "0001_create_posts");
	/// assert_eq!(plan.find("seed").unwrap().index(), 1);
	/// ```
	pub fn builder(id: impl Into<String>) -> MigrationPlanBuilder {
		MigrationPlanBuilder {
			id: id.into(),
			script_base_path: PathBuf::new(),
			units: Vec::new(),
			errors: Vec::new(),
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// Database schema holding the migrated objects and the progress table.
	pub fn schema(&self) -> &str {
		&self.schema
	}

	pub fn script_base_path(&self) -> &Path {
		&self.script_base_path
	}

	pub fn descriptors(&self) -> &[MigrationDescriptor] {
		&self.descriptors
	}

	pub fn len(&self) -> usize {
		self.descriptors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.descriptors.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&MigrationDescriptor> {
		self.descriptors.get(index)
	}

	pub fn find(&self, id: &str) -> Option<&MigrationDescriptor> {
		self.descriptors.iter().find(|descriptor| descriptor.id == id)
	}
}

struct PendingUnit {
	id: String,
	kind: MigrationKind,
	has_assertion: bool,
	assertion_must_initially_fail: bool,
}

/// Builder for [`MigrationPlan`].
pub struct MigrationPlanBuilder {
	id: String,
	script_base_path: PathBuf,
	units: Vec<PendingUnit>,
	errors: Vec<String>,
}

impl MigrationPlanBuilder {
	/// Directory script locations are resolved against.
	pub fn script_base_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.script_base_path = path.into();
		self
	}

	/// Adds a code migration created through [`Default`].
	pub fn add<M>(self) -> Self
	where
		M: Migration + Default + 'static,
	{
		self.add_with(M::default)
	}

	/// Adds a code migration created by `factory`, e.g. to capture parameters.
	pub fn add_with<M, F>(mut self, factory: F) -> Self
	where
		M: Migration + 'static,
		F: Fn() -> M + Send + Sync + 'static,
	{
		let type_name = type_name::<M>();
		let registered = self.units.iter().any(|unit| {
			matches!(unit.kind, MigrationKind::Code { type_name: other, .. } if other == type_name)
		});
		if registered {
			self.errors.push(format!(
				"Migration type {} is already registered.",
				type_name
			));
			return self;
		}
		self.units.push(PendingUnit {
			id: M::id().into_owned(),
			kind: MigrationKind::Code {
				type_name,
				factory: Arc::new(move || Box::new(factory()) as Box<dyn Migration>),
			},
			has_assertion: M::has_assertion(),
			assertion_must_initially_fail: M::assertion_must_initially_fail(),
		});
		self
	}

	/// Adds a script migration whose id is the file name without `.sql`.
	pub fn add_script(self, location: impl Into<PathBuf>) -> Self {
		let location = location.into();
		let id = location
			.file_name()
			.and_then(|name| name.to_str())
			.map(|name| name.strip_suffix(".sql").unwrap_or(name).to_string())
			.unwrap_or_default();
		self.push_script(id, location)
	}

	pub fn add_script_with_id(self, id: impl Into<String>, location: impl Into<PathBuf>) -> Self {
		self.push_script(id.into(), location.into())
	}

	fn push_script(mut self, id: String, location: PathBuf) -> Self {
		let is_sql = location
			.file_name()
			.and_then(|name| name.to_str())
			.is_some_and(|name| name.len() > ".sql".len() && name.ends_with(".sql"));
		if !is_sql {
			self.errors.push(format!(
				"Migration script location '{}' does not name a .sql file.",
				location.display()
			));
			return self;
		}
		self.units.push(PendingUnit {
			id,
			kind: MigrationKind::Script { location },
			has_assertion: false,
			assertion_must_initially_fail: false,
		});
		self
	}

	/// Validates the plan and assigns indices in declaration order.
	///
	/// # Errors
	///
	/// [`Error::InvalidPlan`] listing every problem found.
	pub fn build(self) -> Result<MigrationPlan> {
		let mut errors = self.errors;
		if self.id.is_empty() {
			errors.push("Migration schema is empty string.".to_string());
		} else if self.id.trim().is_empty() {
			errors.push("Migration schema is white space.".to_string());
		}

		let mut descriptors: Vec<MigrationDescriptor> = Vec::with_capacity(self.units.len());
		for unit in self.units {
			if unit.id.trim().is_empty() {
				errors.push(format!("Migration id of {} is empty.", unit.kind));
				continue;
			}
			if let Some(other) = descriptors.iter().find(|descriptor| descriptor.id == unit.id) {
				errors.push(format!(
					"Migration id '{}' of {} is already used by {}.",
					unit.id, unit.kind, other.kind
				));
				continue;
			}
			descriptors.push(MigrationDescriptor {
				index: descriptors.len(),
				id: unit.id,
				kind: unit.kind,
				has_assertion: unit.has_assertion,
				assertion_must_initially_fail: unit.assertion_must_initially_fail,
			});
		}

		if !errors.is_empty() {
			return Err(Error::InvalidPlan(errors.join("\n")));
		}
		Ok(MigrationPlan {
			schema: self.id.to_lowercase(),
			id: self.id,
			script_base_path: self.script_base_path,
			descriptors,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transaction::{RwTransaction, SqlWrite};
	use async_trait::async_trait;
	use rstest::rstest;
	use std::borrow::Cow;
	use tokio_util::sync::CancellationToken;

	#[derive(Default)]
	struct CreatePostsTable;

	#[async_trait]
	impl Migration for CreatePostsTable {
		async fn apply(&self, _tx: &mut RwTransaction<'_>, _ct: &CancellationToken) -> Result<()> {
			Ok(())
		}

		fn has_assertion() -> bool {
			true
		}
	}

	struct AddColumn {
		column: &'static str,
	}

	#[async_trait]
	impl Migration for AddColumn {
		async fn apply(&self, tx: &mut RwTransaction<'_>, ct: &CancellationToken) -> Result<()> {
			let sql = format!("alter table posts add column {} text", self.column);
			tx.execute(&sql, &[], ct).await
		}

		fn id() -> Cow<'static, str> {
			Cow::Borrowed("0001_create_posts")
		}
	}

	fn invalid_plan(result: Result<MigrationPlan>) -> String {
		match result {
			Err(Error::InvalidPlan(message)) => message,
			other => panic!("expected invalid plan, got {:?}", other.map(|plan| plan.len())),
		}
	}

	#[rstest]
	fn test_indices_follow_declaration_order() {
		// Arrange
		let builder = MigrationPlan::builder("Blog")
			.add::<CreatePostsTable>()
			.add_script("scripts/0002_seed.sql")
			.add_with(|| AddColumn { column: "author" });

		// Act
		let plan = builder.build().unwrap();

		// Assert
		let ids: Vec<_> = plan
			.descriptors()
			.iter()
			.map(|descriptor| (descriptor.index(), descriptor.id().to_string()))
			.collect();
		assert_eq!(
			ids,
			vec![
				(0, "CreatePostsTable".to_string()),
				(1, "0002_seed".to_string()),
				(2, "0001_create_posts".to_string()),
			]
		);
		assert!(plan.get(0).unwrap().has_assertion());
		assert!(!plan.get(1).unwrap().has_assertion());
		assert_eq!(plan.schema(), "blog");
	}

	#[rstest]
	#[case("", "Migration schema is empty string.")]
	#[case("  ", "Migration schema is white space.")]
	fn test_schema_must_not_be_blank(#[case] id: &str, #[case] expected: &str) {
		let result = MigrationPlan::builder(id).add::<CreatePostsTable>().build();

		assert_eq!(invalid_plan(result), expected);
	}

	#[rstest]
	fn test_duplicate_type_is_rejected() {
		let result = MigrationPlan::builder("blog")
			.add::<CreatePostsTable>()
			.add::<CreatePostsTable>()
			.build();

		let message = invalid_plan(result);
		assert!(message.starts_with("Migration type "));
		assert!(message.ends_with("CreatePostsTable is already registered."));
	}

	#[rstest]
	fn test_duplicate_id_names_both_units() {
		let result = MigrationPlan::builder("blog")
			.add_script("0001_create_posts.sql")
			.add_with(|| AddColumn { column: "title" })
			.build();

		let message = invalid_plan(result);
		assert!(message.starts_with("Migration id '0001_create_posts' of type "));
		assert!(message.ends_with("is already used by script 0001_create_posts.sql."));
	}

	#[rstest]
	#[case("0001_create_posts.txt")]
	#[case(".sql")]
	#[case("scripts/")]
	fn test_script_location_must_be_sql_file(#[case] location: &str) {
		let result = MigrationPlan::builder("blog").add_script(location).build();

		assert!(invalid_plan(result).contains("does not name a .sql file"));
	}

	#[rstest]
	fn test_all_problems_are_reported_together() {
		let result = MigrationPlan::builder(" ")
			.add::<CreatePostsTable>()
			.add::<CreatePostsTable>()
			.add_script("notes.txt")
			.build();

		assert_eq!(invalid_plan(result).lines().count(), 3);
	}

	#[rstest]
	#[tokio::test]
	async fn test_instantiate_reads_script_from_base_path() {
		// Arrange
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("0001_create_posts.sql"), "create table posts();").unwrap();
		let plan = MigrationPlan::builder("blog")
			.script_base_path(dir.path())
			.add_script("0001_create_posts.sql")
			.build()
			.unwrap();

		// Act
		let result = plan.get(0).unwrap().instantiate(plan.script_base_path()).await;

		// Assert
		assert!(result.is_ok());
		assert!(matches!(
			plan.get(0).unwrap().kind(),
			MigrationKind::Script { location } if location == Path::new("0001_create_posts.sql")
		));
	}

	#[rstest]
	#[tokio::test]
	async fn test_instantiate_reports_missing_script() {
		// Arrange
		let dir = tempfile::tempdir().unwrap();
		let plan = MigrationPlan::builder("blog")
			.script_base_path(dir.path())
			.add_script("0001_create_posts.sql")
			.build()
			.unwrap();

		// Act
		let result = plan.get(0).unwrap().instantiate(plan.script_base_path()).await;

		// Assert
		match result {
			Err(error) => assert!(error.to_string().contains("0001_create_posts.sql")),
			Ok(_) => panic!("missing script must fail"),
		}
	}
}
