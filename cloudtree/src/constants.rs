//! Constants shared across the query engine and its collaborators.

/// Positional dimension names
pub const DIM_X: &str = "X";
pub const DIM_Y: &str = "Y";
pub const DIM_Z: &str = "Z";

/// Radiometric dimension rescaled by the calibration table
pub const DIM_INTENSITY: &str = "Intensity";

/// Provenance dimension used to look up a point's calibration scale
pub const DIM_ORIGIN_ID: &str = "OriginId";

/// Default number of chunks requested from the cache per acquisition
pub const DEFAULT_FETCHES_PER_ITERATION: usize = 6;

/// Default minimum buffer growth per `next()` call (1 MiB)
pub const DEFAULT_MIN_BYTES_PER_ITERATION: usize = 1024 * 1024;

/// Deepest octree level whose chunk ids still fit in 64 bits
pub const MAX_DEPTH_3D: u32 = 21;

/// Deepest quadtree level whose chunk ids still fit in 64 bits
pub const MAX_DEPTH_2D: u32 = 31;

/// Smallest number of chunks a cache may hold
pub const MIN_CACHE_CHUNKS: usize = 16;

/// Smallest per-query reservation a cache may allow
pub const MIN_CHUNKS_PER_QUERY: usize = 4;

/// Default cache capacity in chunks
pub const DEFAULT_CACHE_CHUNKS: usize = 256;

/// Default number of concurrent chunk fetches inside one acquisition
pub const DEFAULT_FETCH_THREADS: usize = 8;

/// Bits per axis in a chunk-local Morton key
pub const MORTON_BITS: u32 = 16;

/// Index description written next to the chunks
pub const METADATA_FILE: &str = "metadata.json";

/// Sorted list of the cold chunk ids that exist
pub const IDS_FILE: &str = "ids.json";

/// Serialized base tubes
pub const BASE_FILE: &str = "base.bin";

/// Optional per-origin intensity calibration table
pub const SCALES_FILE: &str = "scales.json";

/// Relative growth applied to hierarchy query bounds before containment tests
pub const HIERARCHY_BOUNDS_GROWTH: f64 = 0.01;
