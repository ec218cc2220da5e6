//! The physical plan produced by the optimizer's physical-lowering pass
//! (`spec.md` §4.4): [`RelExpr`](lucidb_expr::RelExpr) with join strategy,
//! aggregate strategy, and materialization decisions already chosen, plus
//! the structural shapes of the virtual-table contract (§4.6, §6) that
//! the plan's `Scan`/`Insert`/`Update`/`Delete` nodes are evaluated
//! against. `lucidb-execution` emits instructions over this tree;
//! `lucidb-datastore` implements the contract for the default in-memory
//! module.

pub mod error;
pub mod lowering;
pub mod plan;
pub mod vtab;

pub use error::VtabError;
pub use lowering::lower;
pub use plan::{EquiJoinKeys, PhysicalPlan, SortDir};
pub use vtab::{AccessPlan, FilterConstraint, FilterInfo, FilterOp, FilterOrderBy, PushedFilter};
