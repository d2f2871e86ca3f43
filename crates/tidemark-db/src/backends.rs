//! Database backends
//!
//! - [`classify`]: maps driver failures onto the SQL error taxonomy
//! - [`postgres`]: the sqlx-backed PostgreSQL driver (feature `postgres`)

pub mod classify;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConnection, PostgresDriver};
