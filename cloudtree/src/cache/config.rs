use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CACHE_CHUNKS, DEFAULT_FETCH_THREADS, MIN_CACHE_CHUNKS, MIN_CHUNKS_PER_QUERY,
};

/// Capacity settings of a [`BoundedCache`](super::BoundedCache).
///
/// Setters clamp to the smallest workable values instead of failing.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    max_chunks: usize,
    max_chunks_per_query: usize,
    fetch_threads: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_chunks: DEFAULT_CACHE_CHUNKS,
            max_chunks_per_query: DEFAULT_CACHE_CHUNKS / 4,
            fetch_threads: DEFAULT_FETCH_THREADS,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total chunks the cache may hold, active or not. At least 16.
    pub fn max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks.max(MIN_CACHE_CHUNKS);
        self
    }

    /// Largest batch one acquisition may reserve. At least 4.
    pub fn max_chunks_per_query(mut self, max_chunks_per_query: usize) -> Self {
        self.max_chunks_per_query = max_chunks_per_query.max(MIN_CHUNKS_PER_QUERY);
        self
    }

    /// Parallel fetches inside one acquisition. At least 1.
    pub fn fetch_threads(mut self, fetch_threads: usize) -> Self {
        self.fetch_threads = fetch_threads.max(1);
        self
    }

    pub fn get_max_chunks(&self) -> usize {
        self.max_chunks.max(MIN_CACHE_CHUNKS)
    }

    /// Per-acquisition limit, never above the total capacity.
    pub fn get_max_chunks_per_query(&self) -> usize {
        self.max_chunks_per_query
            .max(MIN_CHUNKS_PER_QUERY)
            .min(self.get_max_chunks())
    }

    pub fn get_fetch_threads(&self) -> usize {
        self.fetch_threads.max(1)
    }
}
