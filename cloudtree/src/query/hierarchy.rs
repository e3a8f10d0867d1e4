use std::collections::{BTreeMap, HashMap};

use log::{debug, error, warn};
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::fetch_plan::plan_fetches;
use super::options::QueryParams;
use crate::cache::{ChunkCache, ChunkSlot};
use crate::constants::HIERARCHY_BOUNDS_GROWTH;
use crate::errors::{CloudError, CloudResult};
use crate::filter::Filter;
use crate::geometry::{Bounds, Dir, Point};
use crate::metadata::Metadata;
use crate::reader::Reader;
use crate::tree::{Climber, PointState, TreeAddress};

/// Point counts of one level of a hierarchy and, keyed by direction, of the
/// levels below it.
///
/// Serializes as `{"n": count, "swd": {...}, ...}`. Zero counts and empty
/// children are left out, so an empty hierarchy is `{}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HierarchyNode {
    count: u64,
    children: BTreeMap<Dir, HierarchyNode>,
}

impl HierarchyNode {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn child(&self, dir: Dir) -> Option<&HierarchyNode> {
        self.children.get(&dir)
    }

    pub fn children(&self) -> impl Iterator<Item = (Dir, &HierarchyNode)> {
        self.children.iter().map(|(dir, node)| (*dir, node))
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.children.is_empty()
    }

    /// Sum of this node's count and every count below it.
    pub fn total(&self) -> u64 {
        self.count + self.children.values().map(HierarchyNode::total).sum::<u64>()
    }

    /// Summed counts per level, starting with this node's.
    pub fn level_counts(&self) -> Vec<u64> {
        let mut levels = Vec::new();
        self.collect_levels(0, &mut levels);
        levels
    }

    pub fn to_json(&self) -> CloudResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn collect_levels(&self, level: usize, levels: &mut Vec<u64>) {
        if levels.len() <= level {
            levels.resize(level + 1, 0);
        }
        levels[level] += self.count;
        for child in self.children.values() {
            child.collect_levels(level + 1, levels);
        }
    }

    fn add(&mut self, path: impl Iterator<Item = Dir>, count: u64) {
        let mut node = self;
        for dir in path {
            node = node.children.entry(dir).or_default();
        }
        node.count += count;
    }
}

impl Serialize for HierarchyNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if self.count > 0 {
            map.serialize_entry("n", &self.count)?;
        }
        for (dir, child) in &self.children {
            map.serialize_entry(&dir.to_string(), child)?;
        }
        map.end()
    }
}

/// Counts the points of every node at depths `[begin, end)` under the
/// smallest node that holds the query bounds.
///
/// The root of the result counts the nodes at the first requested depth.
/// Each child, keyed by its direction below the anchor, counts the next
/// depth on that side, and so on down to the last requested depth. The
/// bounds are grown slightly before anchoring so that a box matching a
/// node exactly anchors on that node. When no node at the first requested
/// depth fits inside the bounds the result is empty.
///
/// Cold chunks are read through `cache` in batches of the query's
/// `fetches_per_iteration`.
pub fn hierarchy(
    reader: &Reader,
    cache: &dyn ChunkCache,
    params: &QueryParams,
) -> CloudResult<HierarchyNode> {
    params.get_options().validate()?;
    let metadata = reader.metadata();
    let structure = metadata.structure();
    let dims = structure.dimensions();
    let extent = params.resolve(metadata)?;

    let mut root = HierarchyNode::default();
    let bounds = match extent.bounds {
        Some(bounds) if !extent.is_empty() => region(&bounds, metadata),
        _ => return Ok(root),
    };
    let anchor = match find_anchor(metadata, &bounds, extent.depth_begin) {
        Some(anchor) => anchor,
        None => {
            debug!(
                "No node at depth {} of {} fits in {}",
                extent.depth_begin,
                reader.path(),
                bounds
            );
            return Ok(root);
        }
    };
    let in_range = |address: &TreeAddress| {
        address.depth >= extent.depth_begin
            && address.depth < extent.depth_end
            && address.ancestor(anchor.depth, dims) == anchor
    };

    let mut counts: HashMap<TreeAddress, u64> = HashMap::new();
    if let Some(base) = reader.base() {
        for (address, count) in base.counts() {
            if in_range(&address) {
                *counts.entry(address).or_default() += count as u64;
            }
        }
    }

    let anchor_bounds = anchor.bounds(metadata.bounds(), dims);
    let filter = Filter::new(metadata, anchor_bounds, None, None)?;
    let mut fetches = plan_fetches(reader, &filter, extent.depth_begin, extent.depth_end);
    let per_batch = params.get_options().get_fetches_per_iteration();
    while !fetches.is_empty() {
        let take = per_batch.min(fetches.len());
        let batch: Vec<_> = fetches.drain(..take).collect();
        let block = match cache.acquire(reader.path(), &batch)? {
            Some(block) => block,
            None => {
                warn!("Cache returned nothing for {} chunks", batch.len());
                continue;
            }
        };
        for (id, slot) in block.chunks() {
            match slot {
                ChunkSlot::Ready(chunk) => {
                    for point in chunk.table().points() {
                        let address = address_of(metadata, point, chunk.depth());
                        if in_range(&address) {
                            *counts.entry(address).or_default() += 1;
                        }
                    }
                }
                ChunkSlot::Failed(reason) => {
                    error!("Reservation failure for chunk {}: {}", id, reason);
                    return Err(CloudError::ReservationFailure {
                        chunk: *id,
                        reason: reason.clone(),
                    });
                }
            }
        }
    }

    let mask = (1u64 << dims) - 1;
    for (address, count) in counts {
        let below = address.depth - anchor.depth;
        let levels = address.depth - extent.depth_begin;
        let path = (0..levels).map(|i| {
            let shift = (below - 1 - i) * dims;
            Dir::from_index(((address.code >> shift) & mask) as usize)
        });
        root.add(path, count);
    }

    debug!(
        "Hierarchy of {} anchored at {} holds {} points",
        reader.path(),
        anchor,
        root.total()
    );
    Ok(root)
}

/// Query bounds grown by a small share of their size. Quadtrees ignore
/// the vertical extent, so it is taken from the cube.
fn region(bounds: &Bounds, metadata: &Metadata) -> Bounds {
    let pad = (*bounds.max() - *bounds.min()) * HIERARCHY_BOUNDS_GROWTH;
    let mut min = *bounds.min() - pad;
    let mut max = *bounds.max() + pad;
    if !metadata.structure().is_3d() {
        min.z = metadata.bounds().min().z;
        max.z = metadata.bounds().max().z;
    }
    Bounds::new(min, max)
}

fn find_anchor(metadata: &Metadata, bounds: &Bounds, depth_begin: u32) -> Option<TreeAddress> {
    let structure = metadata.structure();
    let target = bounds.mid();
    let mut state = PointState::new(structure, *metadata.bounds());
    loop {
        if bounds.contains_bounds(state.bounds()) {
            return Some(*state.address());
        }
        if state.depth() >= depth_begin {
            return None;
        }
        let dir = Dir::of(&target, &state.bounds().mid(), structure.is_3d());
        state = state.climb(dir);
    }
}

fn address_of(metadata: &Metadata, point: &Point, depth: u32) -> TreeAddress {
    let structure = metadata.structure();
    let mut state = PointState::new(structure, *metadata.bounds());
    for _ in 0..depth {
        let dir = Dir::of(point, &state.bounds().mid(), structure.is_3d());
        state = state.climb(dir);
    }
    *state.address()
}
