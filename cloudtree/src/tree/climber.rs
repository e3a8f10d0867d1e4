use smallvec::SmallVec;

use super::{Structure, TreeAddress};
use crate::geometry::{Bounds, Dir};

/// Children of one climber step. Octrees never produce more than eight.
pub type Children<C> = SmallVec<[C; 8]>;

/// A cursor over the tree that derives child positions from its own state.
///
/// Implementations are plain values: climbing never mutates the parent, so
/// branches can be explored independently from an explicit work stack.
pub trait Climber: Sized {
    fn bounds(&self) -> &Bounds;

    fn depth(&self) -> u32;

    /// Number of split axes of the underlying tree.
    fn dimensions(&self) -> u32;

    /// The child whose bounds are the `dir` sub-cube of this node.
    fn climb(&self, dir: Dir) -> Self;

    /// Whether all `B` children must be visited. When false the climber
    /// descends through [`Climber::climb_single`] instead.
    fn all_directions(&self) -> bool {
        true
    }

    /// The single deeper state used when [`Climber::all_directions`] is
    /// false. It keeps this node's bounds.
    fn climb_single(&self) -> Option<Self> {
        None
    }

    fn factor(&self) -> usize {
        1 << self.dimensions()
    }

    /// Child states in direction order.
    fn children(&self) -> Children<Self> {
        if !self.all_directions() {
            if let Some(single) = self.climb_single() {
                let mut children = Children::new();
                children.push(single);
                return children;
            }
        }
        Dir::all(self.factor()).map(|dir| self.climb(dir)).collect()
    }
}

/// Climber over the in-memory base region. Every node splits.
#[derive(Clone, Debug, PartialEq)]
pub struct PointState {
    bounds: Bounds,
    address: TreeAddress,
    dimensions: u32,
}

impl PointState {
    /// State at the root of a tree with the given cube.
    pub fn new(structure: &Structure, cube: Bounds) -> PointState {
        PointState {
            bounds: cube,
            address: TreeAddress::root(),
            dimensions: structure.dimensions(),
        }
    }

    pub fn address(&self) -> &TreeAddress {
        &self.address
    }
}

impl Climber for PointState {
    fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    fn depth(&self) -> u32 {
        self.address.depth
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn climb(&self, dir: Dir) -> PointState {
        let mut bounds = self.bounds;
        bounds.go(dir, self.dimensions == 3);
        PointState {
            bounds,
            address: self.address.child(dir, self.dimensions),
            dimensions: self.dimensions,
        }
    }
}

/// Climber over the cold region, one state per chunk.
///
/// The state starts at the nominal chunk depth, where a single chunk spans the
/// whole cube. Each split step narrows the bounds to one sub-cube; below the
/// sparse depth, chunks stop splitting and widen instead, keeping their bounds
/// while grouping `B` times more node codes per level.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryChunkState {
    bounds: Bounds,
    depth: u32,
    chunk_code: u64,
    points_per_chunk: u64,
    dimensions: u32,
    sparse_depth: Option<u32>,
}

impl QueryChunkState {
    pub fn new(structure: &Structure, cube: Bounds) -> QueryChunkState {
        let depth = structure.nominal_chunk_depth();
        QueryChunkState {
            bounds: cube,
            depth,
            chunk_code: 0,
            points_per_chunk: structure.points_per_chunk(depth),
            dimensions: structure.dimensions(),
            sparse_depth: structure.sparse_depth(),
        }
    }

    /// Code of the first node covered by this chunk.
    pub fn chunk_code(&self) -> u64 {
        self.chunk_code
    }

    pub fn points_per_chunk(&self) -> u64 {
        self.points_per_chunk
    }

    /// Address of the first node covered by this chunk.
    pub fn address(&self) -> TreeAddress {
        TreeAddress::new(self.depth, self.chunk_code)
    }
}

impl Climber for QueryChunkState {
    fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }

    fn climb(&self, dir: Dir) -> QueryChunkState {
        let mut bounds = self.bounds;
        bounds.go(dir, self.dimensions == 3);
        QueryChunkState {
            bounds,
            depth: self.depth + 1,
            chunk_code: (self.chunk_code << self.dimensions)
                + dir.index() as u64 * self.points_per_chunk,
            points_per_chunk: self.points_per_chunk,
            dimensions: self.dimensions,
            sparse_depth: self.sparse_depth,
        }
    }

    fn all_directions(&self) -> bool {
        self.sparse_depth.map_or(true, |sparse| self.depth < sparse)
    }

    fn climb_single(&self) -> Option<QueryChunkState> {
        Some(QueryChunkState {
            bounds: self.bounds,
            depth: self.depth + 1,
            chunk_code: self.chunk_code << self.dimensions,
            points_per_chunk: self.points_per_chunk << self.dimensions,
            dimensions: self.dimensions,
            sparse_depth: self.sparse_depth,
        })
    }
}
