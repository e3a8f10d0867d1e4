//! Bounded chunk cache shared between queries.
//!
//! Chunks are reference counted by the blocks that hold them. A chunk whose
//! last block is dropped becomes inactive and stays resident until capacity
//! is needed, at which point inactive chunks are evicted least recently
//! released first. Acquisitions that would push the number of active chunks
//! past capacity wait for other blocks to be released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

use super::config::CacheConfig;
use super::types::{Block, BlockOwner, ChunkCache, ChunkSlot, FetchInfo};
use crate::errors::{CloudError, CloudResult};
use crate::storage::ChunkReader;
use crate::tree::ChunkId;

type ChunkKey = (String, ChunkId);
type ChunkCell = Arc<OnceCell<Result<Arc<ChunkReader>, String>>>;

struct Entry {
    refs: usize,
    cell: ChunkCell,
}

impl Entry {
    fn failed(&self) -> bool {
        matches!(self.cell.get(), Some(Err(_)))
    }
}

struct CacheState {
    entries: HashMap<ChunkKey, Entry>,
    inactive: LruCache<ChunkKey, ()>,
    active: usize,
}

/// Counters of a [`BoundedCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Requested chunks that were already resident
    pub hits: u64,
    /// Requested chunks that had to be created
    pub misses: u64,
    /// Reads issued against a chunk source
    pub fetches: u64,
    /// Inactive chunks dropped to make room
    pub evictions: u64,
    /// Chunks currently held by at least one block
    pub active: usize,
    /// Resident chunks held by no block
    pub inactive: usize,
}

struct CacheInner {
    config: CacheConfig,
    state: Mutex<CacheState>,
    released: Condvar,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

/// A [`ChunkCache`] holding at most `max_chunks` decoded chunks.
///
/// Cloning is cheap; clones share the same chunks and counters.
#[derive(Clone)]
pub struct BoundedCache {
    inner: Arc<CacheInner>,
}

impl BoundedCache {
    pub fn new(config: CacheConfig) -> BoundedCache {
        BoundedCache {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    inactive: LruCache::unbounded(),
                    active: 0,
                }),
                released: Condvar::new(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                fetches: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            active: state.active,
            inactive: state.inactive.len(),
        }
    }

    /// Whether the chunk is resident, active or not.
    pub fn contains(&self, path: &str, id: ChunkId) -> bool {
        self.inner
            .state
            .lock()
            .entries
            .contains_key(&(path.to_string(), id))
    }

    /// Number of resident chunks.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every inactive chunk.
    pub fn purge(&self) {
        let mut state = self.inner.state.lock();
        while let Some((key, _)) = state.inactive.pop_lru() {
            state.entries.remove(&key);
        }
    }

    fn materialize(&self, fetches: &[FetchInfo], cells: &[ChunkCell]) {
        let pending: Vec<usize> = (0..cells.len())
            .filter(|i| cells[*i].get().is_none())
            .collect();
        let workers = self.inner.config.get_fetch_threads().min(pending.len());

        if workers <= 1 {
            for i in pending {
                self.inner.init(&fetches[i], &cells[i]);
            }
            return;
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        for i in pending {
            if sender.send(i).is_err() {
                break;
            }
        }
        drop(sender);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let receiver = receiver.clone();
                let inner = &self.inner;
                scope.spawn(move || {
                    for i in receiver.iter() {
                        inner.init(&fetches[i], &cells[i]);
                    }
                });
            }
        });
    }
}

impl CacheInner {
    fn init(&self, fetch: &FetchInfo, cell: &ChunkCell) {
        cell.get_or_init(|| {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            fetch
                .load()
                .map(Arc::new)
                .map_err(|err| err.to_string())
        });
    }

    fn evict(&self, state: &mut CacheState) {
        let max = self.config.get_max_chunks();
        while state.active + state.inactive.len() > max {
            match state.inactive.pop_lru() {
                Some((key, _)) => {
                    debug!("Evicting chunk {} of {}", key.1, key.0);
                    state.entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }
}

impl BlockOwner for CacheInner {
    fn release(&self, path: &str, ids: &[ChunkId]) {
        let mut state = self.state.lock();
        for id in ids {
            let key = (path.to_string(), *id);
            let (now_idle, failed) = match state.entries.get_mut(&key) {
                Some(entry) if entry.refs > 0 => {
                    entry.refs -= 1;
                    (entry.refs == 0, entry.failed())
                }
                _ => continue,
            };
            if now_idle {
                state.active -= 1;
                if failed {
                    // Failed reads are retried by the next acquisition.
                    state.entries.remove(&key);
                } else {
                    state.inactive.put(key, ());
                }
            }
        }
        self.evict(&mut state);
        drop(state);
        self.released.notify_all();
    }
}

impl ChunkCache for BoundedCache {
    fn acquire(&self, path: &str, fetches: &[FetchInfo]) -> CloudResult<Option<Block>> {
        if fetches.is_empty() {
            warn!("Empty acquisition requested for {}", path);
            return Ok(None);
        }

        let limit = self.inner.config.get_max_chunks_per_query();
        if fetches.len() > limit {
            return Err(CloudError::QueryLimitExceeded {
                requested: fetches.len(),
                limit,
            });
        }

        let max = self.inner.config.get_max_chunks();
        let mut state = self.inner.state.lock();
        while state.active + fetches.len() > max {
            self.inner.released.wait(&mut state);
        }

        let mut cells = Vec::with_capacity(fetches.len());
        for fetch in fetches {
            let key = (path.to_string(), fetch.chunk_id);
            let cell = match state.entries.get_mut(&key) {
                Some(entry) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    entry.refs += 1;
                    let reactivated = entry.refs == 1;
                    let cell = entry.cell.clone();
                    if reactivated {
                        state.inactive.pop(&key);
                        state.active += 1;
                    }
                    cell
                }
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    let cell = ChunkCell::default();
                    state.entries.insert(
                        key,
                        Entry {
                            refs: 1,
                            cell: cell.clone(),
                        },
                    );
                    state.active += 1;
                    cell
                }
            };
            cells.push(cell);
        }
        self.inner.evict(&mut state);
        debug!(
            "Acquired {} chunks of {} ({} active, {} inactive)",
            fetches.len(),
            path,
            state.active,
            state.inactive.len()
        );
        drop(state);

        self.materialize(fetches, &cells);

        let chunks = fetches
            .iter()
            .zip(cells.iter())
            .map(|(fetch, cell)| {
                let slot = match cell.get() {
                    Some(Ok(reader)) => ChunkSlot::Ready(reader.clone()),
                    Some(Err(reason)) => {
                        error!("Failed to materialize chunk {}: {}", fetch.chunk_id, reason);
                        ChunkSlot::Failed(reason.clone())
                    }
                    None => ChunkSlot::Failed("chunk was never materialized".to_string()),
                };
                (fetch.chunk_id, slot)
            })
            .collect();

        let owner: Arc<dyn BlockOwner> = self.inner.clone();
        Ok(Some(Block::owned(path, chunks, owner)))
    }
}
