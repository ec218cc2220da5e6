//! The virtual-table contract's default tenant (`spec.md` §4.6): the
//! in-memory module backed by `lucidb-table`'s layer chain, the transaction
//! coordinator that sequences `BEGIN`/`SAVEPOINT`/`COMMIT` across whatever
//! tables a statement touches, and the event sink a module forwards
//! committed mutations through.

pub mod coordinator;
pub mod events;
pub mod memory;

pub use coordinator::{CoordinatorError, CoordinatorResult, TransactionCoordinator};
pub use events::{DataChangeSink, NullSink};
pub use memory::MemoryModule;
