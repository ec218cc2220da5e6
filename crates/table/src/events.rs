//! Table-local change records, emitted only after a successful commit
//! (`spec.md` §3 invariant 7, §6 `DataChangeEvent`). `lucidb-datastore`
//! wraps these with schema/table/module identity before handing them to
//! a host's `onDataChange` listener.

use lucidb_primitives::RowId;
use lucidb_sats::Row;

#[derive(Clone, Debug, PartialEq)]
pub enum RowChange {
    Insert { row_id: RowId, new_row: Row },
    Update { row_id: RowId, old_row: Row, new_row: Row },
    Delete { row_id: RowId, old_row: Row },
}
