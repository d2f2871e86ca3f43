//! # Tidemark Core
//!
//! Building blocks shared by every tidemark crate:
//!
//! - [`exception`]: the SQL error taxonomy ([`SqlError`]) and the crate-wide [`Error`]
//! - [`types`]: isolation levels, access modes, query values and rows
//! - [`driver`]: the boundary a concrete database driver implements
//!
//! Driver failures are carried as [`DriverError`] until the classifier in
//! `tidemark-db` maps them onto the taxonomy.

pub mod driver;
pub mod exception;
pub mod types;

pub use driver::{DatabaseDriver, NativeConnection};
pub use exception::{DriverError, DriverErrorKind, Error, Result, SqlConflict, SqlError};
pub use types::{AccessMode, Affect, IsolationLevel, QueryValue, Row, RowError};
