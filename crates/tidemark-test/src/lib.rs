//! # Tidemark Test
//!
//! Testing utilities shared by the tidemark crates:
//!
//! - [`driver`]: an in-memory [`DatabaseDriver`](tidemark_core::DatabaseDriver) that
//!   records every call and fails or answers on request
//! - [`logging`]: one-time `tracing` setup routed through the test harness
//! - `fixtures` (feature `testcontainers`): a PostgreSQL container fixture
//!
//! ```
//! use tidemark_test::driver::{Reply, ScriptedDriver};
//! use tidemark_core::Row;
//!
//! let driver = ScriptedDriver::new();
//! driver.respond("from posts", |_| Ok(Reply::rows(vec![Row::new().with("id", 1i64)])));
//! assert_eq!(driver.open_connections(), 0);
//! ```

pub mod driver;
#[cfg(feature = "testcontainers")]
pub mod fixtures;
pub mod logging;

pub use driver::{Event, ProgressTable, Reply, ScriptedDriver};
pub use logging::init_test_logging;
