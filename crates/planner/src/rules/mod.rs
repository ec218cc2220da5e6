mod caching_insertion;
mod constant_folding;
mod predicate_pushdown;
mod retrieve_growth;
mod sort_elimination;
mod streaming_aggregate;
pub(crate) mod util;

pub use caching_insertion::CachingInsertionRule;
pub use constant_folding::ConstantFoldingRule;
pub use predicate_pushdown::PredicatePushdownRule;
pub use retrieve_growth::RetrieveGrowthRule;
pub use sort_elimination::SortEliminationRule;
pub use streaming_aggregate::StreamingAggregateChoiceRule;
