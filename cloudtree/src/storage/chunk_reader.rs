use std::sync::Arc;

use log::trace;

use crate::errors::CloudResult;
use crate::geometry::Bounds;
use crate::schema::{PointInfo, PointTable, Schema};
use crate::tree::morton::morton_key;
use crate::tree::ChunkId;

/// Decoded contents of one cold chunk.
///
/// Rows are kept sorted by their Morton key relative to the chunk bounds, so
/// that [`ChunkReader::candidates`] can answer a box lookup with one
/// contiguous slice of the table.
#[derive(Debug)]
pub struct ChunkReader {
    id: ChunkId,
    bounds: Bounds,
    depth: u32,
    table: PointTable,
    keys: Vec<u64>,
}

impl ChunkReader {
    /// Decodes raw rows laid out in `schema`.
    pub fn new(
        id: ChunkId,
        bounds: Bounds,
        depth: u32,
        schema: Arc<Schema>,
        bytes: Vec<u8>,
    ) -> CloudResult<ChunkReader> {
        let mut table = PointTable::from_bytes(schema, bytes)?;
        table.sort_by_key(|p| morton_key(p, &bounds));
        let keys = table.points().iter().map(|p| morton_key(p, &bounds)).collect();

        trace!("Decoded chunk {} at depth {} with {} points", id, depth, table.len());
        Ok(ChunkReader {
            id,
            bounds,
            depth,
            table,
            keys,
        })
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn table(&self) -> &PointTable {
        &self.table
    }

    /// Points that may lie inside `query`. Every point inside `query` is
    /// returned; some outside it may be too.
    pub fn candidates<'a>(&'a self, query: &Bounds) -> impl Iterator<Item = PointInfo<'a>> + 'a {
        let (begin, end) = if self.bounds.overlaps(query, true) {
            let lo = morton_key(query.min(), &self.bounds);
            let hi = morton_key(query.max(), &self.bounds);
            (
                self.keys.partition_point(|k| *k < lo),
                self.keys.partition_point(|k| *k <= hi),
            )
        } else {
            (0, 0)
        };
        (begin..end).filter_map(move |i| self.table.get(i))
    }
}
