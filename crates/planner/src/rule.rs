//! The `Rule` trait every optimizer pass is built from (`spec.md` §4.4).

use lucidb_expr::{CapabilityProvider, RelExpr};
use lucidb_schema::Catalog;

/// Read-only context a rule consults while deciding whether/how to
/// rewrite a node: the live schema (for e.g. column nullability when
/// reasoning about outer-join null-extension) and the capability
/// provider a host registers for its virtual-table modules.
pub struct RuleContext<'a> {
    pub catalog: &'a Catalog,
    pub capabilities: &'a dyn CapabilityProvider,
}

/// A single local rewrite, tried bottom-up to a per-node fixpoint by
/// [`crate::optimizer::Optimizer`]. `id` breaks ties when more than one
/// rule in a pass matches the same node -- the lowest id wins, so pass
/// authors order rules by id to express priority, matching the
/// tagged-variant dispatch style the rest of the plan tree uses rather
/// than a numeric cost model (cost-based optimization is explicitly out
/// of scope).
pub trait Rule: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &'static str;

    /// Returns `Some(rewritten)` if this rule applies to `node`, `None`
    /// otherwise. Must not recurse into `node`'s children -- the driver
    /// has already rewritten them to a fixpoint by the time this is
    /// called. Must preserve `node.attributes()` (invariant 1): a
    /// rewrite may only narrow to attributes the caller can no longer
    /// observe, never drop one a parent still references.
    fn rewrite(&self, node: &RelExpr, ctx: &RuleContext) -> Option<RelExpr>;
}
