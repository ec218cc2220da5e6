//! The plan tree: immutable algebraic nodes with stable attribute ids
//! (`spec.md` §3, §4.3).
//!
//! [`rel::RelExpr`] and [`scalar::ScalarExpr`] are the node types an
//! optimizer rule (`lucidb-planner`) rewrites and a physical lowering pass
//! (`lucidb-physical-plan`) consumes. [`builder::PlanBuilder`] is the only
//! place that allocates [`lucidb_primitives::AttributeId`]s from scratch;
//! everything downstream treats them as opaque stable identity.

pub mod builder;
pub mod capabilities;
pub mod checks;
pub mod error;
pub mod rel;
pub mod scalar;

pub use builder::PlanBuilder;
pub use capabilities::{CapabilityProvider, NoPushdown, PredicateOp, VtabCapabilities};
pub use checks::{CheckProvider, CheckTemplate, NoChecks};
pub use error::{PlanError, PlanResult};
pub use rel::{Attribute, AttributeSetExt, Binding, Cardinality, CheckSpec, DmlOp, JoinCondition, JoinKind, LogicalProps, PushedDown, Reduction, RelExpr, SetOpKind};
pub use scalar::{BinaryOp, FrameBound, InList, ScalarExpr, SortDir, UnaryOp, WindowFrame};
