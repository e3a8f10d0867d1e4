use std::collections::HashMap;
use std::sync::Arc;

use log::error;

use crate::constants::{DIM_INTENSITY, DIM_ORIGIN_ID};
use crate::errors::{CloudError, CloudResult};
use crate::filter::Filter;
use crate::geometry::{Delta, Point};
use crate::schema::{DimType, PointInfo, PointRef, Scalar, Schema};

/// How one output dimension is produced from a stored row.
#[derive(Clone, Copy, Debug)]
enum Op {
    /// Transformed coordinate on `axis`.
    Positional { axis: usize },
    /// Stored value times the scale of the row's origin.
    Calibrated { source: usize, origin: usize },
    /// Stored value converted to the output type.
    Copy { source: usize },
}

#[derive(Clone, Copy, Debug)]
struct Field {
    offset: usize,
    out: DimType,
    op: Op,
}

/// Turns matching stored rows into output rows.
///
/// The per-dimension plan is resolved once at construction, so processing a
/// point does no name lookups.
pub(crate) struct Transcoder {
    storage: Arc<Schema>,
    out_schema: Arc<Schema>,
    fields: Vec<Field>,
    filter: Filter,
    delta: Option<Delta>,
    mid: Point,
    scales: Option<Arc<HashMap<u64, f64>>>,
    serialize: bool,
    matched: u64,
}

impl Transcoder {
    pub(crate) fn new(
        storage: Arc<Schema>,
        out_schema: Arc<Schema>,
        filter: Filter,
        delta: Option<Delta>,
        mid: Point,
        scales: Option<Arc<HashMap<u64, f64>>>,
    ) -> CloudResult<Transcoder> {
        let xyz = storage.positional()?;
        let origin = storage.find(DIM_ORIGIN_ID);

        let mut fields = Vec::with_capacity(out_schema.len());
        for (i, dim) in out_schema.dims().iter().enumerate() {
            let source = storage.find(dim.name()).ok_or_else(|| {
                CloudError::InvalidSchema(format!(
                    "output dimension {} is not stored in the index",
                    dim.name()
                ))
            })?;

            let axis = xyz.iter().position(|&index| index == source);
            let op = match (axis, delta.is_some()) {
                (Some(axis), true) => Op::Positional { axis },
                _ if dim.name() == DIM_INTENSITY && scales.is_some() => {
                    let origin = origin.ok_or_else(|| {
                        CloudError::InvalidSchema(format!(
                            "calibrating {} needs an {} dimension",
                            DIM_INTENSITY, DIM_ORIGIN_ID
                        ))
                    })?;
                    Op::Calibrated { source, origin }
                }
                _ => Op::Copy { source },
            };

            fields.push(Field {
                offset: out_schema.offset(i),
                out: dim.dim_type(),
                op,
            });
        }

        Ok(Transcoder {
            storage,
            out_schema,
            fields,
            filter,
            delta,
            mid,
            scales,
            serialize: true,
            matched: 0,
        })
    }

    pub(crate) fn filter(&self) -> &Filter {
        &self.filter
    }

    pub(crate) fn out_schema(&self) -> &Arc<Schema> {
        &self.out_schema
    }

    /// Counts matches without writing rows.
    pub(crate) fn count_only(&mut self) {
        self.serialize = false;
    }

    pub(crate) fn matched(&self) -> u64 {
        self.matched
    }

    /// Appends `info` to `out` if it lies in the query bounds and passes the
    /// filter. Returns whether it was emitted.
    ///
    /// On error nothing is appended.
    pub(crate) fn process(&mut self, info: &PointInfo<'_>, out: &mut Vec<u8>) -> CloudResult<bool> {
        if !self.filter.contains(&info.point) {
            return Ok(false);
        }
        let row = PointRef::new(&self.storage, info.data);
        if !self.filter.check_point(&row, &info.point) {
            return Ok(false);
        }
        if !self.serialize {
            self.matched += 1;
            return Ok(true);
        }

        let start = out.len();
        out.resize(start + self.out_schema.point_size(), 0);
        for field in &self.fields {
            let value = match field.op {
                Op::Positional { axis } => match &self.delta {
                    Some(delta) => Scalar::Floating(delta.apply(axis, info.point[axis], &self.mid)),
                    None => Scalar::Floating(info.point[axis]),
                },
                Op::Calibrated { source, origin } => {
                    let origin_id = row.scalar(origin).as_u64();
                    let scale = self
                        .scales
                        .as_ref()
                        .and_then(|scales| scales.get(&origin_id).copied());
                    match scale {
                        Some(scale) => Scalar::Floating(row.get_f64(source) * scale),
                        None => {
                            out.truncate(start);
                            error!("No calibration scale for origin {}", origin_id);
                            return Err(CloudError::MissingCalibration(origin_id));
                        }
                    }
                }
                Op::Copy { source } => row.scalar(source),
            };
            let begin = start + field.offset;
            field.out.write(value, &mut out[begin..begin + field.out.size()]);
        }

        self.matched += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::dim;
    use crate::geometry::Bounds;
    use crate::metadata::Metadata;
    use crate::schema::DimInfo;
    use crate::tree::Structure;

    fn storage() -> Schema {
        Schema::xyz(vec![
            DimInfo::new("Intensity", DimType::Unsigned16),
            DimInfo::new("OriginId", DimType::Unsigned32),
        ])
        .unwrap()
    }

    fn metadata() -> Metadata {
        let structure = Structure::builder(3).base_depth(0, 2).build().unwrap();
        Metadata::new(
            Bounds::new(Point::splat(0.0), Point::splat(100.0)),
            storage(),
            structure,
        )
        .unwrap()
    }

    fn row(p: Point, intensity: u16, origin: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        for v in [p.x, p.y, p.z] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&intensity.to_le_bytes());
        bytes.extend_from_slice(&origin.to_le_bytes());
        bytes
    }

    fn transcoder(
        out: Schema,
        bounds: Bounds,
        delta: Option<Delta>,
        scales: Option<HashMap<u64, f64>>,
    ) -> CloudResult<Transcoder> {
        let metadata = metadata();
        let filter = Filter::new(&metadata, bounds, None, delta).unwrap();
        Transcoder::new(
            Arc::new(storage()),
            Arc::new(out),
            filter,
            delta,
            metadata.mid(),
            scales.map(Arc::new),
        )
    }

    fn info(data: &[u8]) -> PointInfo<'_> {
        let schema = storage();
        let point = PointRef::new(&schema, data).point(&[0, 1, 2]);
        PointInfo { point, data }
    }

    fn f32_at(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_copy_with_conversion() {
        let out = Schema::new(vec![
            DimInfo::new("Z", DimType::Float),
            DimInfo::new("Intensity", DimType::Unsigned8),
        ])
        .unwrap();
        let mut t = transcoder(out, Bounds::new(Point::splat(0.0), Point::splat(100.0)), None, None)
            .unwrap();

        let data = row(Point::new(1.0, 2.0, 3.5), 300, 0);
        let mut buf = vec![0xaa];
        assert!(t.process(&info(&data), &mut buf).unwrap());
        assert_eq!(buf.len(), 1 + 5);
        assert_eq!(buf[0], 0xaa);
        assert_eq!(f32_at(&buf, 1), 3.5);
        // 300 does not fit in a byte and wraps like a plain cast.
        assert_eq!(buf[5], 300u16 as u8);
        assert_eq!(t.matched(), 1);
    }

    #[test]
    fn test_rejects_outside_bounds_inclusive() {
        let out = Schema::xyz(vec![]).unwrap();
        let bounds = Bounds::new(Point::splat(10.0), Point::splat(20.0));
        let mut t = transcoder(out, bounds, None, None).unwrap();

        let mut buf = Vec::new();
        let inside_face = row(Point::new(10.0, 20.0, 15.0), 0, 0);
        let outside = row(Point::new(9.99, 15.0, 15.0), 0, 0);
        assert!(t.process(&info(&inside_face), &mut buf).unwrap());
        assert!(!t.process(&info(&outside), &mut buf).unwrap());
        assert_eq!(buf.len(), 24);
        assert_eq!(t.matched(), 1);
    }

    #[test]
    fn test_positional_transform() {
        let out = Schema::xyz(vec![]).unwrap();
        let delta = Delta::new(Point::splat(2.0), Point::new(1.0, 0.0, 0.0)).unwrap();
        let mut t = transcoder(
            out,
            Bounds::new(Point::splat(0.0), Point::splat(100.0)),
            Some(delta),
            None,
        )
        .unwrap();

        let data = row(Point::new(50.0, 60.0, 40.0), 0, 0);
        let mut buf = Vec::new();
        assert!(t.process(&info(&data), &mut buf).unwrap());
        let read = |i: usize| f64::from_le_bytes(buf[i * 8..i * 8 + 8].try_into().unwrap());
        // The centre is fixed by the scale, only the offset moves it.
        assert_eq!(read(0), 51.0);
        assert_eq!(read(1), 70.0);
        assert_eq!(read(2), 30.0);
    }

    #[test]
    fn test_calibration() {
        let out = Schema::new(vec![DimInfo::new("Intensity", DimType::Float)]).unwrap();
        let scales = HashMap::from([(7u64, 0.5), (8u64, 2.0)]);
        let mut t = transcoder(
            out,
            Bounds::new(Point::splat(0.0), Point::splat(100.0)),
            None,
            Some(scales),
        )
        .unwrap();

        let mut buf = Vec::new();
        t.process(&info(&row(Point::splat(1.0), 100, 7)), &mut buf).unwrap();
        t.process(&info(&row(Point::splat(1.0), 100, 8)), &mut buf).unwrap();
        assert_eq!(f32_at(&buf, 0), 50.0);
        assert_eq!(f32_at(&buf, 4), 200.0);

        let err = t
            .process(&info(&row(Point::splat(1.0), 100, 9)), &mut buf)
            .unwrap_err();
        assert!(matches!(err, CloudError::MissingCalibration(9)));
        assert_eq!(buf.len(), 8);
        assert_eq!(t.matched(), 2);
    }

    #[test]
    fn test_unknown_output_dimension() {
        let out = Schema::new(vec![DimInfo::new("GpsTime", DimType::Double)]).unwrap();
        let err = transcoder(out, Bounds::everything(), None, None).err().unwrap();
        assert!(matches!(err, CloudError::InvalidSchema(_)));
    }

    #[test]
    fn test_attribute_filter_and_count_only() {
        let metadata = metadata();
        let predicate = dim("Intensity").gte(10);
        let filter = Filter::new(
            &metadata,
            Bounds::new(Point::splat(0.0), Point::splat(100.0)),
            Some(&predicate),
            None,
        )
        .unwrap();
        let mut t = Transcoder::new(
            Arc::new(storage()),
            Arc::new(storage()),
            filter,
            None,
            metadata.mid(),
            None,
        )
        .unwrap();
        t.count_only();

        let mut buf = Vec::new();
        assert!(!t.process(&info(&row(Point::splat(1.0), 9, 0)), &mut buf).unwrap());
        assert!(t.process(&info(&row(Point::splat(1.0), 10, 0)), &mut buf).unwrap());
        assert!(buf.is_empty());
        assert_eq!(t.matched(), 1);
    }
}
