//! # Cloudtree - Out-of-Core Point Cloud Queries
//!
//! This crate serves spatial queries over large point clouds indexed in a
//! hierarchical tree. The upper levels of the tree ("base") live in memory;
//! the lower levels ("cold") are stored as chunks that are paged in through a
//! bounded cache while a query runs.
//!
//! ## Features
//!
//! - **Resumable Queries**: `next(&mut buffer)` appends a bounded portion of
//!   results per call, so large results can be streamed
//! - **Two-Level Filtering**: whole tree nodes are rejected before any chunk
//!   is fetched, then every candidate point is checked exactly
//! - **Attribute Filters**: JSON or fluent predicates over any dimension
//! - **Output Transforms**: per-axis scale and offset applied on the way out,
//!   with query bounds expressed in output space
//! - **Schema Conversion**: any subset of stored dimensions, in any numeric
//!   type, with optional per-origin intensity calibration
//! - **Bounded Cache**: shared, reference counted chunk cache with LRU
//!   eviction and parallel fetches
//! - **Hierarchy Counts**: per-node point counts over a region and depth
//!   range, nested by direction
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cloudtree::{BoundedCache, CacheConfig, Query, QueryParams, Reader};
//! use cloudtree::filter::dim;
//! use cloudtree::storage::FsSource;
//!
//! # fn main() -> cloudtree::CloudResult<()> {
//! let source = Arc::new(FsSource::new("/data/autzen"));
//! let reader = Arc::new(Reader::open("autzen", source)?);
//! let cache = Arc::new(BoundedCache::new(CacheConfig::new().max_chunks(512)));
//!
//! let params = QueryParams::new()
//!     .bounds(Bounds::new(Point::new(0.0, 0.0, 0.0), Point::new(100.0, 100.0, 50.0)))
//!     .depth(0, 12)
//!     .filter(dim("Classification").eq(2));
//!
//! let mut query = Query::new(reader, cache, params)?;
//! let mut buffer = Vec::new();
//! while query.next(&mut buffer)? {
//!     // hand off buffer contents
//!     buffer.clear();
//! }
//! # Ok(())
//! # }
//! ```

mod constants;
mod errors;
mod metadata;
mod reader;

pub mod cache;
pub mod filter;
pub mod geometry;
pub mod query;
pub mod schema;
pub mod storage;
pub mod tree;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use constants::*;
pub use errors::{CloudError, CloudResult};
pub use metadata::Metadata;
pub use reader::Reader;

// Re-export the types most queries need
pub use cache::{BoundedCache, CacheConfig, CacheStats, ChunkCache};
pub use geometry::{Bounds, Delta, Dir, Point};
pub use query::{hierarchy, HierarchyNode, Query, QueryOptions, QueryParams, QueryPhase};
pub use schema::{DimInfo, DimType, Schema};
pub use tree::{ChunkId, Structure};

#[cfg(test)]
#[ctor::ctor]
fn init() {
    colog::init();
}
