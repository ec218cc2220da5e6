//! The memory table engine (`spec.md` §4.7): a layered MVCC store over an
//! ordered primary tree and per-index secondary trees, with nested
//! savepoints, constraint deferral support, and post-commit change events.
//!
//! A [`Table`] owns one [`layer::BaseLayer`] holding committed data,
//! topped by zero or more [`layer::TransactionLayer`]s holding
//! in-progress mutations. Reads merge the chain via [`cursor`]; writes
//! always land on the topmost transaction layer. See [`Table`] for the
//! write path and savepoint/commit/rollback operations.

pub mod cursor;
pub mod error;
pub mod events;
pub mod key;
pub mod layer;
pub mod sorted_map;
pub mod table;

pub use error::{TableError, TableResult};
pub use events::RowChange;
pub use key::{Bound, KeyComparator, ScanBounds};
pub use table::Table;
