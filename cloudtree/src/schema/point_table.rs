use std::sync::Arc;

use super::{Scalar, Schema};
use crate::errors::{CloudError, CloudResult};
use crate::geometry::Point;

/// A schema bound to one raw row, for typed field access.
#[derive(Clone, Copy, Debug)]
pub struct PointRef<'a> {
    schema: &'a Schema,
    data: &'a [u8],
}

impl<'a> PointRef<'a> {
    /// Binds `data` to `schema`. `data` must be at least one row long.
    pub fn new(schema: &'a Schema, data: &'a [u8]) -> PointRef<'a> {
        debug_assert!(data.len() >= schema.point_size());
        PointRef { schema, data }
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Value of dimension `index` of the bound schema.
    #[inline]
    pub fn scalar(&self, index: usize) -> Scalar {
        let offset = self.schema.offset(index);
        self.schema.dim(index).dim_type().read(&self.data[offset..])
    }

    #[inline]
    pub fn get_f64(&self, index: usize) -> f64 {
        self.scalar(index).as_f64()
    }

    /// Value of the dimension called `name`, if the schema has one.
    pub fn field(&self, name: &str) -> Option<Scalar> {
        self.schema.find(name).map(|i| self.scalar(i))
    }

    /// Position built from the dimensions at `xyz`.
    #[inline]
    pub fn point(&self, xyz: &[usize; 3]) -> Point {
        Point::new(self.get_f64(xyz[0]), self.get_f64(xyz[1]), self.get_f64(xyz[2]))
    }
}

/// One stored point: its derived position and its raw row.
#[derive(Clone, Copy, Debug)]
pub struct PointInfo<'a> {
    pub point: Point,
    pub data: &'a [u8],
}

/// An owned, contiguous run of rows sharing one schema.
///
/// Positions are decoded once when the table is built so that spatial tests
/// never re-read the row bytes.
#[derive(Clone, Debug)]
pub struct PointTable {
    schema: Arc<Schema>,
    xyz: [usize; 3],
    data: Vec<u8>,
    points: Vec<Point>,
}

impl PointTable {
    pub fn new(schema: Arc<Schema>) -> CloudResult<PointTable> {
        let xyz = schema.positional()?;
        Ok(PointTable {
            schema,
            xyz,
            data: Vec::new(),
            points: Vec::new(),
        })
    }

    /// Builds a table over `data`, which must be a whole number of rows.
    pub fn from_bytes(schema: Arc<Schema>, data: Vec<u8>) -> CloudResult<PointTable> {
        let size = schema.point_size();
        if data.len() % size != 0 {
            return Err(CloudError::Encoding(format!(
                "{} bytes is not a whole number of {}-byte rows",
                data.len(),
                size
            )));
        }

        let mut table = PointTable::new(schema)?;
        table.points = data
            .chunks_exact(size)
            .map(|row| PointRef::new(&table.schema, row).point(&table.xyz))
            .collect();
        table.data = data;
        Ok(table)
    }

    /// Appends one row.
    pub fn push(&mut self, row: &[u8]) -> CloudResult<()> {
        if row.len() != self.schema.point_size() {
            return Err(CloudError::Encoding(format!(
                "row of {} bytes does not match point size {}",
                row.len(),
                self.schema.point_size()
            )));
        }
        self.points
            .push(PointRef::new(&self.schema, row).point(&self.xyz));
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, index: usize) -> Option<PointInfo<'_>> {
        let size = self.schema.point_size();
        let point = *self.points.get(index)?;
        Some(PointInfo {
            point,
            data: &self.data[index * size..(index + 1) * size],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = PointInfo<'_>> + '_ {
        let size = self.schema.point_size();
        self.points
            .iter()
            .zip(self.data.chunks_exact(size))
            .map(|(point, data)| PointInfo {
                point: *point,
                data,
            })
    }

    /// Reorders rows by `key`, keeping positions and bytes aligned.
    pub(crate) fn sort_by_key<K: Ord>(&mut self, key: impl Fn(&Point) -> K) {
        let size = self.schema.point_size();
        let mut order: Vec<usize> = (0..self.points.len()).collect();
        order.sort_by_key(|&i| key(&self.points[i]));

        let mut data = Vec::with_capacity(self.data.len());
        let mut points = Vec::with_capacity(self.points.len());
        for i in order {
            data.extend_from_slice(&self.data[i * size..(i + 1) * size]);
            points.push(self.points[i]);
        }
        self.data = data;
        self.points = points;
    }

    pub(crate) fn points(&self) -> &[Point] {
        &self.points
    }
}
