//! Scripted driver
//!
//! [`ScriptedDriver`] is an in-memory [`DatabaseDriver`] for unit tests. It records
//! every call as an [`Event`], fails calls on request and answers statements through
//! registered responders. Clones share one script, so a test keeps a clone to inspect
//! what the code under test did.
//!
//! Failures and responders match on substrings of the statement. Transaction control
//! is matched against the pseudo-statements `BEGIN ISOLATION LEVEL <level>`, `COMMIT`
//! and `ROLLBACK`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tidemark_core::{
	DatabaseDriver, DriverError, IsolationLevel, NativeConnection, QueryValue, Row,
};

type Responder = Arc<dyn Fn(&[QueryValue]) -> Result<Reply, DriverError> + Send + Sync>;
type CommitHook = Box<dyn FnOnce() + Send>;

/// Something the code under test did to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
	Open {
		connection: usize,
	},
	/// An open failed with a queued failure.
	OpenFailed,
	Begin {
		connection: usize,
		isolation_level: IsolationLevel,
	},
	Execute {
		connection: usize,
		sql: String,
		params: Vec<QueryValue>,
	},
	Query {
		connection: usize,
		sql: String,
		params: Vec<QueryValue>,
	},
	Batch {
		connection: usize,
		sql: String,
	},
	Commit {
		connection: usize,
	},
	Rollback {
		connection: usize,
	},
	Close {
		connection: usize,
	},
	/// The connection was dropped without being closed.
	Discard {
		connection: usize,
	},
}

/// Answer to a statement.
#[derive(Default)]
pub struct Reply {
	rows: Vec<Row>,
	affected: u64,
	on_commit: Option<CommitHook>,
}

impl Reply {
	pub fn rows(rows: Vec<Row>) -> Self {
		Self {
			rows,
			..Self::default()
		}
	}

	pub fn affected(affected: u64) -> Self {
		Self {
			affected,
			..Self::default()
		}
	}

	/// Runs `hook` when the transaction that issued the statement commits.
	pub fn on_commit(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
		self.on_commit = Some(Box::new(hook));
		self
	}
}

impl fmt::Debug for Reply {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Reply")
			.field("rows", &self.rows)
			.field("affected", &self.affected)
			.field("on_commit", &self.on_commit.is_some())
			.finish()
	}
}

#[derive(Default)]
struct Script {
	next_connection: usize,
	open_connections: usize,
	open_failures: VecDeque<DriverError>,
	failures: Vec<(String, DriverError)>,
	responders: Vec<(String, Responder)>,
	events: Vec<Event>,
}

impl Script {
	/// Takes the first failure matching `statement`. Failures fire once.
	fn take_failure(&mut self, statement: &str) -> Option<DriverError> {
		let position = self
			.failures
			.iter()
			.position(|(pattern, _)| statement.contains(pattern.as_str()))?;
		Some(self.failures.remove(position).1)
	}

	fn responder(&self, sql: &str) -> Option<Responder> {
		self.responders
			.iter()
			.find(|(pattern, _)| sql.contains(pattern.as_str()))
			.map(|(_, responder)| responder.clone())
	}
}

/// In-memory driver driven by a test script.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tidemark_core::{DatabaseDriver, DriverError, IsolationLevel};
/// use tidemark_test::driver::{Event, ScriptedDriver};
///
/// # tokio_test::block_on(async {
/// let driver = ScriptedDriver::new();
/// driver.fail_on("COMMIT", DriverError::server(Some("40001".to_string()), "conflict"));
///
/// let mut connection = driver.open_connection(Duration::from_secs(1)).await.unwrap();
/// connection
///     .begin_transaction(IsolationLevel::Serializable, Duration::from_secs(1))
///     .await
///     .unwrap();
/// assert!(connection.commit(Duration::from_secs(1)).await.is_err());
/// connection.close().await;
///
/// assert_eq!(driver.open_connections(), 0);
/// assert!(matches!(driver.events().last(), Some(Event::Close { .. })));
/// # });
/// ```
#[derive(Clone, Default)]
pub struct ScriptedDriver {
	script: Arc<Mutex<Script>>,
}

impl ScriptedDriver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Queues a failure for the next open. Queued failures are consumed in order.
	pub fn fail_open(&self, error: DriverError) {
		self.script.lock().open_failures.push_back(error);
	}

	/// Fails the next statement containing `pattern`.
	pub fn fail_on(&self, pattern: &str, error: DriverError) {
		self.script.lock().failures.push((pattern.to_string(), error));
	}

	/// Answers every statement containing `pattern`. The first registered match wins;
	/// statements without a responder get no rows and zero affected rows.
	pub fn respond<F>(&self, pattern: &str, responder: F)
	where
		F: Fn(&[QueryValue]) -> Result<Reply, DriverError> + Send + Sync + 'static,
	{
		self.script
			.lock()
			.responders
			.push((pattern.to_string(), Arc::new(responder)));
	}

	pub fn events(&self) -> Vec<Event> {
		self.script.lock().events.clone()
	}

	/// SQL of every executed statement, query and batch, in order. Transaction
	/// control is not included.
	pub fn statements(&self) -> Vec<String> {
		self.script
			.lock()
			.events
			.iter()
			.filter_map(|event| match event {
				Event::Execute { sql, .. } | Event::Query { sql, .. } | Event::Batch { sql, .. } => {
					Some(sql.clone())
				}
				_ => None,
			})
			.collect()
	}

	/// Connections opened and not yet closed or dropped.
	pub fn open_connections(&self) -> usize {
		self.script.lock().open_connections
	}
}

impl fmt::Debug for ScriptedDriver {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let script = self.script.lock();
		f.debug_struct("ScriptedDriver")
			.field("open_connections", &script.open_connections)
			.field("events", &script.events.len())
			.finish()
	}
}

#[async_trait]
impl DatabaseDriver for ScriptedDriver {
	async fn open_connection(
		&self,
		_timeout: Duration,
	) -> Result<Box<dyn NativeConnection>, DriverError> {
		let mut script = self.script.lock();
		if let Some(error) = script.open_failures.pop_front() {
			script.events.push(Event::OpenFailed);
			return Err(error);
		}
		script.next_connection += 1;
		script.open_connections += 1;
		let id = script.next_connection;
		script.events.push(Event::Open { connection: id });
		Ok(Box::new(ScriptedConnection {
			id,
			script: self.script.clone(),
			in_transaction: false,
			pending: Vec::new(),
			released: false,
		}))
	}
}

struct ScriptedConnection {
	id: usize,
	script: Arc<Mutex<Script>>,
	in_transaction: bool,
	/// Hooks of statements issued in the current transaction.
	pending: Vec<CommitHook>,
	released: bool,
}

impl ScriptedConnection {
	/// Records `event` unless a failure is scripted for `statement`.
	fn record(&self, statement: &str, event: Event) -> Result<(), DriverError> {
		let mut script = self.script.lock();
		if let Some(error) = script.take_failure(statement) {
			return Err(error);
		}
		script.events.push(event);
		Ok(())
	}

	fn reply(&mut self, sql: &str, params: &[QueryValue]) -> Result<Reply, DriverError> {
		// The lock is released before the responder runs.
		let responder = self.script.lock().responder(sql);
		let mut reply = match responder {
			Some(responder) => responder(params)?,
			None => Reply::default(),
		};
		if let Some(hook) = reply.on_commit.take() {
			self.pending.push(hook);
		}
		Ok(reply)
	}

	fn release(&mut self, event: Event) {
		if self.released {
			return;
		}
		self.released = true;
		self.pending.clear();
		let mut script = self.script.lock();
		if self.in_transaction {
			script.events.push(Event::Rollback {
				connection: self.id,
			});
			self.in_transaction = false;
		}
		script.open_connections -= 1;
		script.events.push(event);
	}
}

#[async_trait]
impl NativeConnection for ScriptedConnection {
	async fn begin_transaction(
		&mut self,
		isolation_level: IsolationLevel,
		_timeout: Duration,
	) -> Result<(), DriverError> {
		self.record(
			&format!("BEGIN ISOLATION LEVEL {}", isolation_level.to_sql()),
			Event::Begin {
				connection: self.id,
				isolation_level,
			},
		)?;
		self.in_transaction = true;
		Ok(())
	}

	async fn execute(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		_timeout: Duration,
	) -> Result<u64, DriverError> {
		self.record(
			sql,
			Event::Execute {
				connection: self.id,
				sql: sql.to_string(),
				params: params.to_vec(),
			},
		)?;
		Ok(self.reply(sql, params)?.affected)
	}

	async fn query(
		&mut self,
		sql: &str,
		params: &[QueryValue],
		_timeout: Duration,
	) -> Result<Vec<Row>, DriverError> {
		self.record(
			sql,
			Event::Query {
				connection: self.id,
				sql: sql.to_string(),
				params: params.to_vec(),
			},
		)?;
		Ok(self.reply(sql, params)?.rows)
	}

	async fn execute_batch(&mut self, sql: &str, _timeout: Duration) -> Result<u64, DriverError> {
		self.record(
			sql,
			Event::Batch {
				connection: self.id,
				sql: sql.to_string(),
			},
		)?;
		Ok(self.reply(sql, &[])?.affected)
	}

	async fn commit(&mut self, _timeout: Duration) -> Result<(), DriverError> {
		self.in_transaction = false;
		let hooks = std::mem::take(&mut self.pending);
		self.record(
			"COMMIT",
			Event::Commit {
				connection: self.id,
			},
		)?;
		for hook in hooks {
			hook();
		}
		Ok(())
	}

	async fn rollback(&mut self, _timeout: Duration) -> Result<(), DriverError> {
		self.in_transaction = false;
		self.pending.clear();
		self.record(
			"ROLLBACK",
			Event::Rollback {
				connection: self.id,
			},
		)
	}

	async fn close(mut self: Box<Self>) {
		let id = self.id;
		self.release(Event::Close { connection: id });
	}
}

impl Drop for ScriptedConnection {
	fn drop(&mut self) {
		let id = self.id;
		self.release(Event::Discard { connection: id });
	}
}

/// In-memory `"<schema>".migrations` progress table.
///
/// Installs responders for the progress queries of the migration engine. Inserted
/// records become visible when the inserting transaction commits.
#[derive(Debug, Clone, Default)]
pub struct ProgressTable {
	records: Arc<Mutex<Vec<(usize, String)>>>,
}

impl ProgressTable {
	pub fn install(driver: &ScriptedDriver, schema: &str) -> Self {
		let table = Self::default();

		let reader = table.clone();
		driver.respond(&format!(r#"from "{}".migrations"#, schema), move |_| {
			let rows = reader
				.records
				.lock()
				.iter()
				.max_by_key(|(index, _)| *index)
				.map(|(index, id)| Row::new().with("index", *index).with("id", id.as_str()))
				.into_iter()
				.collect();
			Ok(Reply::rows(rows))
		});

		let writer = table.clone();
		driver.respond(&format!(r#"insert into "{}".migrations"#, schema), move |params| {
			let (index, id) = match params {
				[QueryValue::Int(index), QueryValue::String(id)] if *index >= 0 => {
					(*index as usize, id.clone())
				}
				other => {
					return Err(DriverError::client(format!(
						"unexpected progress parameters {:?}",
						other
					)));
				}
			};
			let committed = writer.clone();
			Ok(Reply::affected(1).on_commit(move || committed.records.lock().push((index, id))))
		});

		table
	}

	/// Stores a record as if an earlier run had committed it.
	pub fn seed(&self, index: usize, id: &str) {
		self.records.lock().push((index, id.to_string()));
	}

	/// Committed records in insertion order.
	pub fn records(&self) -> Vec<(usize, String)> {
		self.records.lock().clone()
	}

	/// Committed migration ids in insertion order.
	pub fn ids(&self) -> Vec<String> {
		self.records().into_iter().map(|(_, id)| id).collect()
	}
}
