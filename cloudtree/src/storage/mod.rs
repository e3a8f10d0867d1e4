//! Where points live: the base tubes in memory and the cold chunks behind a
//! [`ChunkSource`].

mod base;
mod chunk_reader;
mod source;

pub use base::BaseData;
pub use chunk_reader::ChunkReader;
pub use source::{ChunkSource, FsSource, MemorySource};
