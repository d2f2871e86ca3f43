//! Transactions
//!
//! - [`handle`]: one open transaction with post-commit callbacks
//! - [`access`]: read, write and commit capabilities and the typed views
//! - [`scope`]: per unit-of-work transaction with access negotiation
//! - [`provider`]: begin shortcuts and the `using` helper

pub mod access;
pub mod handle;
pub mod provider;
pub mod scope;

pub use access::{RoTransaction, RwTransaction, SqlCommit, SqlRead, SqlWrite};
pub use handle::TransactionHandle;
pub use provider::TransactionProvider;
pub use scope::{ScopeAccess, TransactionScope};
