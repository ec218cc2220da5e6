//! The schema catalog (`spec.md` §2): tables, secondary indexes,
//! functions, collations, and virtual-table modules, plus the
//! change-notification channel DDL commits publish on.

pub mod catalog;
pub mod def;
pub mod error;
pub mod notifier;

pub use catalog::{Catalog, StColumnRow, StIndexRow, StTableRow};
pub use def::{
    CheckConstraintDef, CheckOpMask, ColumnDef, ColumnDefault, FunctionArity, FunctionDef, FunctionKind, IndexDef,
    IndexKind, ModuleDef, TableSchema,
};
pub use error::{SchemaError, SchemaResult};
pub use notifier::{ChangeNotifier, SchemaChangeEvent, SchemaChangeKind, SchemaObjectKind, SubscriptionHandle};
