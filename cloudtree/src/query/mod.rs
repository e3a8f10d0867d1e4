//! Query execution: fetch planning, the resumable traversal, point
//! transcoding and hierarchy counts.

mod fetch_plan;
mod hierarchy;
mod options;
#[allow(clippy::module_inception)]
mod query;
mod transcode;

pub use hierarchy::{hierarchy, HierarchyNode};
pub use options::{QueryOptions, QueryParams};
pub use query::{Query, QueryPhase};
