//! Query filtering: the attribute predicate language and the two-level
//! filter the traversal consults.

mod fluent;
mod predicate;
mod query_filter;

pub use fluent::{and, dim, not, or, DimFilter};
pub use predicate::{CompareOp, Predicate};
pub use query_filter::Filter;
