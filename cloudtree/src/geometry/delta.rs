use serde::{Deserialize, Serialize};

use super::{Bounds, Point};
use crate::errors::{CloudError, CloudResult};

/// A per-axis scale and offset between index space and output space.
///
/// Stored coordinates are centered on the index cube midpoint before scaling,
/// so the midpoint maps to itself under any pure scale:
///
/// ```text
/// out = (stored - mid) * scale + mid + offset
/// ```
///
/// In JSON the scale may be a single number or an `[x, y, z]` triple, and the
/// offset defaults to zero:
///
/// ```rust
/// use cloudtree::Delta;
///
/// let delta: Delta = serde_json::from_str(r#"{"scale": 0.01, "offset": [10, 20, 0]}"#).unwrap();
/// assert_eq!(delta.scale().x, 0.01);
/// assert_eq!(delta.offset().y, 20.0);
/// ```
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(try_from = "DeltaRepr", into = "DeltaRepr")]
pub struct Delta {
    scale: Point,
    offset: Point,
}

impl Delta {
    /// Creates a delta, rejecting zero scale factors.
    pub fn new(scale: Point, offset: Point) -> CloudResult<Delta> {
        if scale.x == 0.0 || scale.y == 0.0 || scale.z == 0.0 {
            return Err(CloudError::InvalidBounds(format!(
                "delta scale must be non-zero on every axis, found {}",
                scale
            )));
        }
        Ok(Delta { scale, offset })
    }

    /// A delta with the same scale on every axis and no offset.
    pub fn uniform(scale: f64) -> CloudResult<Delta> {
        Delta::new(Point::splat(scale), Point::default())
    }

    pub fn identity() -> Delta {
        Delta {
            scale: Point::splat(1.0),
            offset: Point::default(),
        }
    }

    pub fn scale(&self) -> &Point {
        &self.scale
    }

    pub fn offset(&self) -> &Point {
        &self.offset
    }

    pub fn is_identity(&self) -> bool {
        self.scale == Point::splat(1.0) && self.offset == Point::default()
    }

    /// The delta taking coordinates already transformed by `inner` to where
    /// this delta would take the untransformed ones.
    ///
    /// An index built with its own delta stores `inner`-space coordinates;
    /// composing a query delta with it gives the transform to apply to
    /// stored points. Both deltas share the same fixed centre.
    pub fn relative_to(&self, inner: &Delta) -> CloudResult<Delta> {
        let scale = Point::new(
            self.scale.x / inner.scale.x,
            self.scale.y / inner.scale.y,
            self.scale.z / inner.scale.z,
        );
        let offset = Point::new(
            self.offset.x - inner.offset.x * scale.x,
            self.offset.y - inner.offset.y * scale.y,
            self.offset.z - inner.offset.z * scale.z,
        );
        Delta::new(scale, offset)
    }

    /// Maps one stored coordinate on `axis` to output space.
    #[inline]
    pub fn apply(&self, axis: usize, value: f64, mid: &Point) -> f64 {
        Point::scale(value, mid[axis], self.scale[axis], self.offset[axis])
    }

    /// Maps one output coordinate on `axis` back to index space.
    #[inline]
    pub fn unapply(&self, axis: usize, value: f64, mid: &Point) -> f64 {
        Point::unscale(value, mid[axis], self.scale[axis], self.offset[axis])
    }

    pub fn apply_point(&self, p: &Point, mid: &Point) -> Point {
        Point::new(
            self.apply(0, p.x, mid),
            self.apply(1, p.y, mid),
            self.apply(2, p.z, mid),
        )
    }

    pub fn unapply_point(&self, p: &Point, mid: &Point) -> Point {
        Point::new(
            self.unapply(0, p.x, mid),
            self.unapply(1, p.y, mid),
            self.unapply(2, p.z, mid),
        )
    }

    /// Expresses output-space bounds in index space. Corners are re-ordered,
    /// so negative scales are handled.
    pub fn localize(&self, bounds: &Bounds, mid: &Point) -> Bounds {
        Bounds::new(
            self.unapply_point(bounds.min(), mid),
            self.unapply_point(bounds.max(), mid),
        )
    }

    /// Expresses index-space bounds in output space.
    pub fn globalize(&self, bounds: &Bounds, mid: &Point) -> Bounds {
        Bounds::new(
            self.apply_point(bounds.min(), mid),
            self.apply_point(bounds.max(), mid),
        )
    }
}

impl Default for Delta {
    fn default() -> Self {
        Delta::identity()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ScaleRepr {
    Uniform(f64),
    PerAxis([f64; 3]),
}

#[derive(Serialize, Deserialize)]
struct DeltaRepr {
    scale: ScaleRepr,
    #[serde(default)]
    offset: [f64; 3],
}

impl TryFrom<DeltaRepr> for Delta {
    type Error = CloudError;

    fn try_from(repr: DeltaRepr) -> CloudResult<Delta> {
        let scale = match repr.scale {
            ScaleRepr::Uniform(s) => Point::splat(s),
            ScaleRepr::PerAxis([x, y, z]) => Point::new(x, y, z),
        };
        let [x, y, z] = repr.offset;
        Delta::new(scale, Point::new(x, y, z))
    }
}

impl From<Delta> for DeltaRepr {
    fn from(d: Delta) -> DeltaRepr {
        let scale = if d.scale.x == d.scale.y && d.scale.y == d.scale.z {
            ScaleRepr::Uniform(d.scale.x)
        } else {
            ScaleRepr::PerAxis([d.scale.x, d.scale.y, d.scale.z])
        };
        DeltaRepr {
            scale,
            offset: [d.offset.x, d.offset.y, d.offset.z],
        }
    }
}
