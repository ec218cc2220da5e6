//! The value and type model (`spec.md` §4.1): logical/physical type
//! separation, value comparison under collations, and the coercion rules
//! numeric and text comparisons rely on.

pub mod collation;
pub mod compare;
pub mod types;
pub mod value;

pub use collation::Collation;
pub use compare::{coerce_for_arithmetic, coerce_for_comparison, compare, order_key, CompareResult, NullOrdering};
pub use types::LogicalType;
pub use value::{PhysicalType, Row, TemporalKind, TemporalValue, Value};
