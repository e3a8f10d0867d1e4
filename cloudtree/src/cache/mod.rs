//! Chunk cache contract and the bounded reference cache.

mod bounded_cache;
mod config;
mod types;

pub use bounded_cache::{BoundedCache, CacheStats};
pub use config::CacheConfig;
pub use types::{Block, BlockOwner, ChunkCache, ChunkSlot, FetchInfo};
