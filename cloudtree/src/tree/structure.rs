use serde::{Deserialize, Serialize};

use super::{level_index, ChunkId, TreeAddress};
use crate::constants::{MAX_DEPTH_2D, MAX_DEPTH_3D};
use crate::errors::{CloudError, CloudResult};

/// Shape of an index tree.
///
/// Depths `[base_depth_begin, base_depth_end)` are held in memory as tubes.
/// Depths from `base_depth_end` (the cold depth begin) up to
/// `cold_depth_end`, or the deepest addressable level when no end is given,
/// are stored as chunks.
///
/// A chunk at depth `d` groups `points_per_chunk(d)` consecutive node codes.
/// Above the sparse depth that count is `B^nominal_chunk_depth`; below it,
/// chunks stop splitting and every extra level multiplies the count by `B`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StructureRepr")]
pub struct Structure {
    dimensions: u32,
    base_depth_begin: u32,
    base_depth_end: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    cold_depth_end: Option<u32>,
    nominal_chunk_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    sparse_depth: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructureRepr {
    dimensions: u32,
    #[serde(default)]
    base_depth_begin: u32,
    base_depth_end: u32,
    #[serde(default)]
    cold_depth_end: Option<u32>,
    nominal_chunk_depth: u32,
    #[serde(default)]
    sparse_depth: Option<u32>,
}

impl TryFrom<StructureRepr> for Structure {
    type Error = CloudError;

    fn try_from(r: StructureRepr) -> CloudResult<Structure> {
        Structure::builder(r.dimensions)
            .base_depth(r.base_depth_begin, r.base_depth_end)
            .cold_depth_end(r.cold_depth_end)
            .nominal_chunk_depth(r.nominal_chunk_depth)
            .sparse_depth(r.sparse_depth)
            .build()
    }
}

impl Structure {
    pub fn builder(dimensions: u32) -> StructureBuilder {
        StructureBuilder {
            dimensions,
            base_depth_begin: 0,
            base_depth_end: 0,
            cold_depth_end: None,
            nominal_chunk_depth: 0,
            sparse_depth: None,
        }
    }

    /// Number of split axes: 2 for a quadtree, 3 for an octree.
    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    /// Branching factor `B`.
    pub fn factor(&self) -> usize {
        1 << self.dimensions
    }

    pub fn is_3d(&self) -> bool {
        self.dimensions == 3
    }

    pub fn base_depth_begin(&self) -> u32 {
        self.base_depth_begin
    }

    pub fn base_depth_end(&self) -> u32 {
        self.base_depth_end
    }

    pub fn cold_depth_begin(&self) -> u32 {
        self.base_depth_end
    }

    pub fn cold_depth_end(&self) -> Option<u32> {
        self.cold_depth_end
    }

    pub fn nominal_chunk_depth(&self) -> u32 {
        self.nominal_chunk_depth
    }

    pub fn sparse_depth(&self) -> Option<u32> {
        self.sparse_depth
    }

    /// Deepest level whose chunk ids fit in 64 bits.
    pub fn max_depth(&self) -> u32 {
        if self.is_3d() {
            MAX_DEPTH_3D
        } else {
            MAX_DEPTH_2D
        }
    }

    /// Exclusive end of all stored depths.
    pub fn depth_limit(&self) -> u32 {
        self.cold_depth_end.unwrap_or(self.max_depth() + 1)
    }

    pub fn has_base(&self) -> bool {
        self.base_depth_end > self.base_depth_begin
    }

    pub fn has_cold(&self) -> bool {
        self.depth_limit() > self.cold_depth_begin()
    }

    pub fn in_base(&self, depth: u32) -> bool {
        depth >= self.base_depth_begin && depth < self.base_depth_end
    }

    pub fn in_cold(&self, depth: u32) -> bool {
        depth >= self.cold_depth_begin() && depth < self.depth_limit()
    }

    /// Number of node codes grouped into one chunk at `depth`.
    pub fn points_per_chunk(&self, depth: u32) -> u64 {
        let nominal = 1u64 << (self.dimensions * self.nominal_chunk_depth);
        match self.sparse_depth {
            Some(sparse) if depth > sparse => nominal << (self.dimensions * (depth - sparse)),
            _ => nominal,
        }
    }

    /// Depth of the node whose region one chunk at `depth` spans.
    pub fn chunk_anchor_depth(&self, depth: u32) -> u32 {
        let spanned = match self.sparse_depth {
            Some(sparse) if depth > sparse => sparse,
            _ => depth,
        };
        spanned - self.nominal_chunk_depth
    }

    /// Identifier of the chunk holding the node at `address`, or `None` when
    /// that depth is not part of the cold region.
    pub fn chunk_id(&self, address: &TreeAddress) -> Option<ChunkId> {
        if !self.in_cold(address.depth) {
            return None;
        }
        let per_chunk = self.points_per_chunk(address.depth);
        let chunk_code = (address.code / per_chunk) * per_chunk;
        Some(ChunkId::new(
            level_index(self.dimensions, address.depth) + chunk_code,
        ))
    }
}

/// Validating builder for [`Structure`].
#[derive(Clone, Debug)]
pub struct StructureBuilder {
    dimensions: u32,
    base_depth_begin: u32,
    base_depth_end: u32,
    cold_depth_end: Option<u32>,
    nominal_chunk_depth: u32,
    sparse_depth: Option<u32>,
}

impl StructureBuilder {
    /// Sets the in-memory depth range. Its end is also the cold depth begin.
    pub fn base_depth(mut self, begin: u32, end: u32) -> Self {
        self.base_depth_begin = begin;
        self.base_depth_end = end;
        self
    }

    pub fn cold_depth_end(mut self, end: Option<u32>) -> Self {
        self.cold_depth_end = end;
        self
    }

    pub fn nominal_chunk_depth(mut self, depth: u32) -> Self {
        self.nominal_chunk_depth = depth;
        self
    }

    pub fn sparse_depth(mut self, depth: Option<u32>) -> Self {
        self.sparse_depth = depth;
        self
    }

    pub fn build(self) -> CloudResult<Structure> {
        let invalid =
            |msg: String| -> CloudResult<Structure> { Err(CloudError::InvalidStructure(msg)) };

        if self.dimensions != 2 && self.dimensions != 3 {
            return invalid(format!("dimensions must be 2 or 3, found {}", self.dimensions));
        }
        let max_depth = if self.dimensions == 3 {
            MAX_DEPTH_3D
        } else {
            MAX_DEPTH_2D
        };
        if self.base_depth_begin > self.base_depth_end {
            return invalid(format!(
                "base depth begin {} is past base depth end {}",
                self.base_depth_begin, self.base_depth_end
            ));
        }
        if self.base_depth_end > max_depth + 1 {
            return invalid(format!("base depth end {} is too deep", self.base_depth_end));
        }
        if let Some(end) = self.cold_depth_end {
            if end < self.base_depth_end || end > max_depth + 1 {
                return invalid(format!(
                    "cold depth end {} must be in [{}, {}]",
                    end,
                    self.base_depth_end,
                    max_depth + 1
                ));
            }
        }
        if self.nominal_chunk_depth > self.base_depth_end {
            return invalid(format!(
                "nominal chunk depth {} is past cold depth begin {}",
                self.nominal_chunk_depth, self.base_depth_end
            ));
        }

        // A sparse depth above the cold region has no effect on chunking.
        let sparse_depth = self.sparse_depth.map(|s| s.max(self.base_depth_end));

        Ok(Structure {
            dimensions: self.dimensions,
            base_depth_begin: self.base_depth_begin,
            base_depth_end: self.base_depth_end,
            cold_depth_end: self.cold_depth_end,
            nominal_chunk_depth: self.nominal_chunk_depth,
            sparse_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octree() -> Structure {
        Structure::builder(3)
            .base_depth(0, 3)
            .nominal_chunk_depth(2)
            .build()
            .unwrap()
    }

    #[test]
    fn test_regions() {
        let s = octree();
        assert_eq!(s.factor(), 8);
        assert!(s.in_base(0));
        assert!(s.in_base(2));
        assert!(!s.in_base(3));
        assert!(s.in_cold(3));
        assert!(s.in_cold(21));
        assert!(!s.in_cold(22));
        assert_eq!(s.depth_limit(), 22);
    }

    #[test]
    fn test_chunk_id_groups_codes() {
        let s = octree();
        // 64 codes per chunk at every depth without a sparse depth.
        assert_eq!(s.points_per_chunk(3), 64);
        assert_eq!(s.points_per_chunk(9), 64);

        let first = s.chunk_id(&TreeAddress::new(3, 0)).unwrap();
        assert_eq!(first, ChunkId::new(73));
        assert_eq!(s.chunk_id(&TreeAddress::new(3, 63)), Some(first));
        assert_eq!(
            s.chunk_id(&TreeAddress::new(3, 64)),
            Some(ChunkId::new(73 + 64))
        );
        assert_eq!(s.chunk_id(&TreeAddress::new(2, 5)), None);
    }

    #[test]
    fn test_sparse_chunks_widen() {
        let s = Structure::builder(3)
            .base_depth(0, 2)
            .nominal_chunk_depth(1)
            .sparse_depth(Some(3))
            .build()
            .unwrap();

        assert_eq!(s.points_per_chunk(3), 8);
        assert_eq!(s.points_per_chunk(4), 64);
        assert_eq!(s.points_per_chunk(5), 512);
        assert_eq!(s.chunk_anchor_depth(3), 2);
        assert_eq!(s.chunk_anchor_depth(5), 2);
    }

    #[test]
    fn test_validation() {
        assert!(Structure::builder(4).build().is_err());
        assert!(Structure::builder(3).base_depth(4, 2).build().is_err());
        assert!(Structure::builder(3)
            .base_depth(0, 3)
            .nominal_chunk_depth(4)
            .build()
            .is_err());
        assert!(Structure::builder(3)
            .base_depth(0, 3)
            .cold_depth_end(Some(30))
            .build()
            .is_err());
        assert!(Structure::builder(2)
            .base_depth(0, 3)
            .cold_depth_end(Some(30))
            .build()
            .is_ok());
    }

    #[test]
    fn test_sparse_depth_clamped_to_cold_begin() {
        let s = Structure::builder(3)
            .base_depth(0, 4)
            .nominal_chunk_depth(2)
            .sparse_depth(Some(1))
            .build()
            .unwrap();
        assert_eq!(s.sparse_depth(), Some(4));
    }

    #[test]
    fn test_json() {
        let json = r#"{
            "dimensions": 2,
            "baseDepthEnd": 4,
            "coldDepthEnd": 10,
            "nominalChunkDepth": 3
        }"#;
        let s: Structure = serde_json::from_str(json).unwrap();
        assert_eq!(s.factor(), 4);
        assert_eq!(s.base_depth_begin(), 0);
        assert_eq!(s.cold_depth_end(), Some(10));
        assert_eq!(s.sparse_depth(), None);

        let bad = r#"{"dimensions": 3, "baseDepthEnd": 2, "nominalChunkDepth": 5}"#;
        assert!(serde_json::from_str::<Structure>(bad).is_err());
    }
}
