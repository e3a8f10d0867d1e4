//! Fixture assembly for tests and benchmarks.
//!
//! [`FixtureBuilder`] places points at chosen depths of an index: rows at
//! base depths go into the tube of the node containing them, rows at cold
//! depths go into the chunk covering that node. Chunks on the path from the
//! cold region's first depth down to each populated chunk are created empty
//! if nothing else fills them, so every stored point is reachable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::Rng;

use crate::constants::{BASE_FILE, IDS_FILE, METADATA_FILE, SCALES_FILE};
use crate::errors::{CloudError, CloudResult};
use crate::geometry::{Bounds, Dir, Point};
use crate::metadata::Metadata;
use crate::reader::Reader;
use crate::schema::{DimInfo, DimType, PointRef, Scalar, Schema};
use crate::storage::{BaseData, MemorySource};
use crate::tree::{ChunkId, Structure, TreeAddress};

/// A point placed by a [`FixtureBuilder`], kept for computing expectations.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredPoint {
    pub depth: u32,
    pub point: Point,
    pub row: Vec<u8>,
}

/// An assembled index ready for querying.
pub struct Fixture {
    pub reader: Arc<Reader>,
    pub source: Arc<MemorySource>,
    pub points: Vec<StoredPoint>,
}

impl Fixture {
    /// Stored points for which `keep` holds, in insertion order.
    pub fn select(&self, keep: impl Fn(&StoredPoint) -> bool) -> Vec<&StoredPoint> {
        self.points.iter().filter(|p| keep(p)).collect()
    }
}

pub struct FixtureBuilder {
    path: String,
    metadata: Metadata,
    schema: Arc<Schema>,
    xyz: [usize; 3],
    base: BaseData,
    chunks: BTreeMap<ChunkId, Vec<u8>>,
    scales: Option<HashMap<u64, f64>>,
    points: Vec<StoredPoint>,
}

impl FixtureBuilder {
    pub fn new(metadata: Metadata) -> CloudResult<FixtureBuilder> {
        let schema = Arc::new(metadata.schema().clone());
        let xyz = schema.positional()?;
        Ok(FixtureBuilder {
            path: "fixture".to_string(),
            base: BaseData::new(schema.clone()),
            metadata,
            schema,
            xyz,
            chunks: BTreeMap::new(),
            scales: None,
            points: Vec::new(),
        })
    }

    /// An index over `cube` storing X, Y and Z followed by `extra`.
    pub fn xyz(
        cube: Bounds,
        structure: Structure,
        extra: Vec<DimInfo>,
    ) -> CloudResult<FixtureBuilder> {
        let metadata = Metadata::new(cube, Schema::xyz(extra)?, structure)?;
        FixtureBuilder::new(metadata)
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn scales(mut self, scales: HashMap<u64, f64>) -> Self {
        self.scales = Some(scales);
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Encodes a row: the position, then `extra` for the remaining
    /// dimensions in schema order.
    pub fn encode(&self, point: &Point, extra: &[Scalar]) -> CloudResult<Vec<u8>> {
        let mut row = vec![0u8; self.schema.point_size()];
        let mut extra = extra.iter();
        for (i, dim) in self.schema.dims().iter().enumerate() {
            let value = match self.xyz.iter().position(|&index| index == i) {
                Some(axis) => Scalar::Floating(point[axis]),
                None => *extra.next().ok_or_else(|| {
                    CloudError::Encoding(format!("no value for dimension {}", dim.name()))
                })?,
            };
            let offset = self.schema.offset(i);
            dim.dim_type()
                .write(value, &mut row[offset..offset + dim.dim_type().size()]);
        }
        Ok(row)
    }

    /// Places a point at `depth`.
    pub fn point(&mut self, depth: u32, point: Point, extra: &[Scalar]) -> CloudResult<()> {
        let row = self.encode(&point, extra)?;
        self.row(depth, row)
    }

    /// Places a raw row at `depth`.
    pub fn row(&mut self, depth: u32, row: Vec<u8>) -> CloudResult<()> {
        if row.len() != self.schema.point_size() {
            return Err(CloudError::Encoding(format!(
                "row of {} bytes for a {} byte schema",
                row.len(),
                self.schema.point_size()
            )));
        }
        let point = PointRef::new(&self.schema, &row).point(&self.xyz);
        let address = self.address_of(&point, depth)?;
        let structure = self.metadata.structure();

        if structure.in_base(depth) {
            self.base.push(address, &row)?;
        } else if let Some(id) = structure.chunk_id(&address) {
            let dims = structure.dimensions();
            for above in structure.cold_depth_begin()..depth {
                if let Some(parent) = structure.chunk_id(&address.ancestor(above, dims)) {
                    self.chunks.entry(parent).or_default();
                }
            }
            self.chunks.entry(id).or_default().extend_from_slice(&row);
        } else {
            return Err(CloudError::InvalidOperation(format!(
                "depth {} is not stored by this index",
                depth
            )));
        }

        self.points.push(StoredPoint { depth, point, row });
        Ok(())
    }

    /// Places `count` uniformly random points at depths drawn from
    /// `depths`. Non-positional dimensions are drawn from `0..256`.
    pub fn random<R: Rng>(
        &mut self,
        rng: &mut R,
        count: usize,
        depths: std::ops::Range<u32>,
    ) -> CloudResult<()> {
        let bounds = *self.metadata.bounds_conforming();
        let extras: Vec<DimType> = self
            .schema
            .dims()
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.xyz.contains(i))
            .map(|(_, dim)| dim.dim_type())
            .collect();

        for _ in 0..count {
            let mut coords = [0.0; 3];
            for (axis, coord) in coords.iter_mut().enumerate() {
                let (lo, hi) = bounds.range(axis);
                *coord = if hi > lo && (hi - lo).is_finite() {
                    rng.gen_range(lo..hi)
                } else {
                    lo.max(0.0).min(hi)
                };
            }
            let p = Point::new(coords[0], coords[1], coords[2]);
            let extra: Vec<Scalar> = extras
                .iter()
                .map(|t| match t {
                    DimType::Float | DimType::Double => {
                        Scalar::Floating(rng.gen_range(0.0..256.0))
                    }
                    _ => Scalar::Unsigned(rng.gen_range(0..256)),
                })
                .collect();
            let depth = rng.gen_range(depths.clone());
            self.point(depth, p, &extra)?;
        }
        Ok(())
    }

    /// Finishes the index, storing chunks and index files in a fresh
    /// [`MemorySource`] so that [`Reader::open`] can read it back.
    pub fn build(self) -> CloudResult<Fixture> {
        let source = Arc::new(MemorySource::new(self.path.clone()));
        let ids: Vec<ChunkId> = self.chunks.keys().copied().collect();
        for (id, bytes) in self.chunks {
            source.put(id, bytes);
        }

        let structure = self.metadata.structure();
        source.put_file(METADATA_FILE, self.metadata.to_json()?.into_bytes());
        if structure.has_base() {
            source.put_file(BASE_FILE, self.base.to_bytes());
        }
        if structure.has_cold() {
            let raw: Vec<u64> = ids.iter().map(|id| id.value()).collect();
            source.put_file(IDS_FILE, serde_json::to_vec(&raw)?);
        }
        if let Some(scales) = &self.scales {
            source.put_file(SCALES_FILE, serde_json::to_vec(scales)?);
        }

        let mut reader = Reader::new(self.path, self.metadata, source.clone())
            .with_base(self.base)?
            .with_chunk_ids(ids);
        if let Some(scales) = self.scales {
            reader = reader.with_scales(scales);
        }

        Ok(Fixture {
            reader: Arc::new(reader),
            source,
            points: self.points,
        })
    }

    fn address_of(&self, point: &Point, depth: u32) -> CloudResult<TreeAddress> {
        let cube = self.metadata.bounds();
        if !cube.contains(point) {
            return Err(CloudError::InvalidBounds(format!(
                "{} lies outside {}",
                point, cube
            )));
        }
        let structure = self.metadata.structure();
        let dims = structure.dimensions();
        let mut bounds = *cube;
        let mut address = TreeAddress::root();
        for _ in 0..depth {
            let dir = Dir::of(point, &bounds.mid(), structure.is_3d());
            bounds.go(dir, structure.is_3d());
            address = address.child(dir, dims);
        }
        Ok(address)
    }
}
