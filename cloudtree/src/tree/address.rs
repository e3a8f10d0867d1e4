use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{Bounds, Dir};

/// Position of one node in the tree: its depth and its index within that
/// depth.
///
/// Child codes append the direction as the lowest `dimensions` bits, so the
/// codes of one depth enumerate the nodes in Morton order and `code < B^depth`
/// always holds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeAddress {
    pub depth: u32,
    pub code: u64,
}

impl TreeAddress {
    pub const fn new(depth: u32, code: u64) -> TreeAddress {
        TreeAddress { depth, code }
    }

    pub const fn root() -> TreeAddress {
        TreeAddress { depth: 0, code: 0 }
    }

    /// Address of the child in direction `dir`.
    #[inline]
    pub fn child(&self, dir: Dir, dimensions: u32) -> TreeAddress {
        TreeAddress {
            depth: self.depth + 1,
            code: (self.code << dimensions) + dir.index() as u64,
        }
    }

    /// Address of the parent, or `None` at the root.
    pub fn parent(&self, dimensions: u32) -> Option<TreeAddress> {
        if self.depth == 0 {
            return None;
        }
        Some(TreeAddress {
            depth: self.depth - 1,
            code: self.code >> dimensions,
        })
    }

    /// Address of the ancestor at `depth`, which must not exceed this
    /// address's depth.
    pub fn ancestor(&self, depth: u32, dimensions: u32) -> TreeAddress {
        debug_assert!(depth <= self.depth);
        TreeAddress {
            depth,
            code: self.code >> ((self.depth - depth) * dimensions),
        }
    }

    /// Bounds of this node inside the root `cube`.
    pub fn bounds(&self, cube: &Bounds, dimensions: u32) -> Bounds {
        let mask = (1u64 << dimensions) - 1;
        let mut bounds = *cube;
        for level in (0..self.depth).rev() {
            let dir = Dir::from_index(((self.code >> (level * dimensions)) & mask) as usize);
            bounds.go(dir, dimensions == 3);
        }
        bounds
    }
}

impl fmt::Display for TreeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.depth, self.code)
    }
}

/// Storage identifier of one cold chunk.
///
/// The id is the chunk's level-order position: the number of nodes above its
/// depth plus the code of the first node it covers. Its storage key is the
/// decimal rendering.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(u64);

impl ChunkId {
    pub const fn new(id: u64) -> ChunkId {
        ChunkId(id)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Storage key of this chunk.
    pub fn key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of nodes at all depths above `depth` for branching factor
/// `2^dimensions`.
#[inline]
pub fn level_index(dimensions: u32, depth: u32) -> u64 {
    let factor = 1u64 << dimensions;
    ((1u64 << (dimensions * depth)) - 1) / (factor - 1)
}
