use std::fmt;
use std::sync::Arc;

use crate::errors::CloudResult;
use crate::geometry::Bounds;
use crate::schema::Schema;
use crate::storage::{ChunkReader, ChunkSource};
use crate::tree::ChunkId;

/// Everything needed to materialize one planned chunk.
#[derive(Clone)]
pub struct FetchInfo {
    pub source: Arc<dyn ChunkSource>,
    pub schema: Arc<Schema>,
    pub chunk_id: ChunkId,
    pub bounds: Bounds,
    pub depth: u32,
}

impl fmt::Debug for FetchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchInfo")
            .field("source", &self.source.path())
            .field("chunk_id", &self.chunk_id)
            .field("bounds", &self.bounds)
            .field("depth", &self.depth)
            .finish()
    }
}

impl FetchInfo {
    /// Reads and decodes this chunk from its source.
    pub fn load(&self) -> CloudResult<ChunkReader> {
        let bytes = self.source.get(self.chunk_id)?;
        ChunkReader::new(
            self.chunk_id,
            self.bounds,
            self.depth,
            self.schema.clone(),
            bytes,
        )
    }
}

/// Outcome of materializing one chunk of a batch.
#[derive(Clone, Debug)]
pub enum ChunkSlot {
    Ready(Arc<ChunkReader>),
    Failed(String),
}

/// Receives the chunk ids of a [`Block`] when it is dropped.
pub trait BlockOwner: Send + Sync {
    fn release(&self, path: &str, ids: &[ChunkId]);
}

/// A batch of chunks held for one query.
///
/// The chunks stay reserved until the block is dropped, at which point they
/// are handed back to the owning cache.
pub struct Block {
    path: String,
    chunks: Vec<(ChunkId, ChunkSlot)>,
    owner: Option<Arc<dyn BlockOwner>>,
}

impl Block {
    /// A block that releases nothing on drop.
    pub fn new(path: impl Into<String>, chunks: Vec<(ChunkId, ChunkSlot)>) -> Block {
        Block {
            path: path.into(),
            chunks,
            owner: None,
        }
    }

    /// A block whose chunk ids are released to `owner` on drop.
    pub fn owned(
        path: impl Into<String>,
        chunks: Vec<(ChunkId, ChunkSlot)>,
        owner: Arc<dyn BlockOwner>,
    ) -> Block {
        Block {
            path: path.into(),
            chunks,
            owner: Some(owner),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn chunks(&self) -> &[(ChunkId, ChunkSlot)] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<ChunkId> = self.chunks.iter().map(|(id, _)| *id).collect();
        f.debug_struct("Block")
            .field("path", &self.path)
            .field("chunks", &ids)
            .finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            let ids: Vec<ChunkId> = self.chunks.iter().map(|(id, _)| *id).collect();
            owner.release(&self.path, &ids);
        }
    }
}

/// Materializes batches of chunks for queries.
///
/// `acquire` may block until capacity is available. It returns `Ok(None)`
/// when nothing could be reserved for the batch; a query then moves on
/// without those chunks. A returned block holds one slot per requested
/// chunk, and a [`ChunkSlot::Failed`] slot means the cache broke its
/// contract for that chunk.
pub trait ChunkCache: Send + Sync {
    fn acquire(&self, path: &str, fetches: &[FetchInfo]) -> CloudResult<Option<Block>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        released: Mutex<Vec<(String, Vec<ChunkId>)>>,
    }

    impl BlockOwner for Recorder {
        fn release(&self, path: &str, ids: &[ChunkId]) {
            self.released.lock().push((path.to_string(), ids.to_vec()));
        }
    }

    #[test]
    fn test_block_releases_on_drop() {
        let recorder = Arc::new(Recorder::default());
        let block = Block::owned(
            "index",
            vec![
                (ChunkId::new(1), ChunkSlot::Failed("x".into())),
                (ChunkId::new(2), ChunkSlot::Failed("y".into())),
            ],
            recorder.clone(),
        );
        assert_eq!(block.len(), 2);
        assert!(recorder.released.lock().is_empty());

        drop(block);
        let released = recorder.released.lock();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, "index");
        assert_eq!(released[0].1, vec![ChunkId::new(1), ChunkId::new(2)]);
    }

    #[test]
    fn test_unowned_block() {
        let block = Block::new("index", vec![]);
        assert!(block.is_empty());
        assert_eq!(format!("{:?}", block), "Block { path: \"index\", chunks: [] }");
    }
}
