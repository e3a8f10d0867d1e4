//! Tree shape, node addressing and the climbers that walk it.

mod address;
mod climber;
pub mod morton;
mod structure;

pub use address::{level_index, ChunkId, TreeAddress};
pub use climber::{Children, Climber, PointState, QueryChunkState};
pub use structure::{Structure, StructureBuilder};
