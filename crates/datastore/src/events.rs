//! Where a table's post-commit mutation events go once they leave
//! `lucidb-table`'s layer chain (`spec.md` §6 `onDataChange`).
//!
//! `lucidb-execution::vtab::Connection::commit` has no return payload --
//! only `ExecResult<()>` -- so the memory module can't hand events back
//! through the trait it implements. Instead every [`MemoryModule`] is
//! built with a [`DataChangeSink`], and forwards each committed
//! [`DataChangeEvent`] to it directly. `lucidb-core`'s `Database` is the
//! real implementation, fanning out to whatever `onDataChange` listeners
//! a host registered; a rolled-back transaction never calls this at all,
//! since nothing downstream of `Connection::rollback` ever sees its
//! layer's events.
//!
//! [`MemoryModule`]: crate::memory::MemoryModule

use lucidb_execution::vtab::DataChangeEvent;

pub trait DataChangeSink: Send + Sync {
    fn on_commit(&self, event: DataChangeEvent);
}

/// Drops every event. The coordinator's default when nothing has
/// registered an `onDataChange` listener yet, and what tests outside
/// `lucidb-core` reach for when they don't care about the event stream.
pub struct NullSink;

impl DataChangeSink for NullSink {
    fn on_commit(&self, _event: DataChangeEvent) {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<DataChangeEvent>>,
    }

    impl DataChangeSink for RecordingSink {
        fn on_commit(&self, event: DataChangeEvent) {
            self.events.lock().expect("recording sink lock poisoned").push(event);
        }
    }
}
