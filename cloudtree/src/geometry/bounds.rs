use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Dir, Point};
use crate::errors::{CloudError, CloudResult};

/// An axis-aligned box defined by its minimum and maximum corners.
///
/// Index bounds are always cubes so that every subdivision produces equal
/// children; query bounds may be arbitrary boxes. The constructor orders the
/// corners, so `min <= max` holds componentwise for every `Bounds` value.
///
/// `Bounds` serializes as `[minx, miny, minz, maxx, maxy, maxz]`. The 2D form
/// `[minx, miny, maxx, maxy]` is accepted on input and leaves `z` unbounded.
///
/// # Examples
///
/// ```rust
/// use cloudtree::{Bounds, Point};
///
/// let cube = Bounds::new(Point::new(0.0, 0.0, 0.0), Point::new(8.0, 8.0, 8.0));
/// assert!(cube.contains(&Point::new(4.0, 4.0, 4.0)));
/// assert_eq!(cube.mid(), Point::new(4.0, 4.0, 4.0));
/// ```
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Bounds {
    min: Point,
    max: Point,
    mid: Point,
}

impl Bounds {
    /// Creates bounds from two opposite corners, in any order.
    pub fn new(a: Point, b: Point) -> Bounds {
        let min = a.min(&b);
        let max = a.max(&b);
        Bounds {
            min,
            max,
            mid: mid_of(&min, &max),
        }
    }

    /// Creates bounds from an x/y extent with an unbounded z range.
    pub fn new_2d(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Bounds {
        Bounds::new(
            Point::new(min_x, min_y, -f64::MAX),
            Point::new(max_x, max_y, f64::MAX),
        )
    }

    /// Bounds covering all finite space.
    pub fn everything() -> Bounds {
        Bounds::new(Point::splat(-f64::MAX), Point::splat(f64::MAX))
    }

    pub fn min(&self) -> &Point {
        &self.min
    }

    pub fn max(&self) -> &Point {
        &self.max
    }

    pub fn mid(&self) -> Point {
        self.mid
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn depth(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn height(&self) -> f64 {
        self.max.z - self.min.z
    }

    /// Extent of one axis as `(min, max)`.
    pub fn range(&self, axis: usize) -> (f64, f64) {
        (self.min.axis(axis), self.max.axis(axis))
    }

    /// Checks if a point lies within these bounds, faces included.
    #[inline]
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Checks if another box lies entirely within these bounds.
    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        self.contains(&other.min) && self.contains(&other.max)
    }

    /// Checks if two boxes share any volume. With `inclusive`, boxes that only
    /// touch along a face also count as overlapping.
    #[inline]
    pub fn overlaps(&self, other: &Bounds, inclusive: bool) -> bool {
        if inclusive {
            self.min.x <= other.max.x
                && self.max.x >= other.min.x
                && self.min.y <= other.max.y
                && self.max.y >= other.min.y
                && self.min.z <= other.max.z
                && self.max.z >= other.min.z
        } else {
            self.min.x < other.max.x
                && self.max.x > other.min.x
                && self.min.y < other.max.y
                && self.max.y > other.min.y
                && self.min.z < other.max.z
                && self.max.z > other.min.z
        }
    }

    /// Returns the overlapping region, or `None` if the boxes are disjoint.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        if !self.overlaps(other, true) {
            return None;
        }
        Some(Bounds::new(self.min.max(&other.min), self.max.min(&other.max)))
    }

    /// Narrows these bounds to the child cube in direction `dir`. The z range
    /// is only split when `is_3d` is set.
    pub fn go(&mut self, dir: Dir, is_3d: bool) {
        if dir.is_east() {
            self.min.x = self.mid.x;
        } else {
            self.max.x = self.mid.x;
        }

        if dir.is_north() {
            self.min.y = self.mid.y;
        } else {
            self.max.y = self.mid.y;
        }

        if is_3d {
            if dir.is_up() {
                self.min.z = self.mid.z;
            } else {
                self.max.z = self.mid.z;
            }
        }

        self.mid = mid_of(&self.min, &self.max);
    }

    /// Returns the child cube in direction `dir`.
    pub fn get(&self, dir: Dir, is_3d: bool) -> Bounds {
        let mut child = *self;
        child.go(dir, is_3d);
        child
    }

    /// Grows these bounds into a cube around the same center.
    pub fn cubeify(&self, is_3d: bool) -> Bounds {
        let mut radius = (self.width() / 2.0).max(self.depth() / 2.0);
        if is_3d {
            radius = radius.max(self.height() / 2.0);
        }

        let (min_z, max_z) = if is_3d {
            (self.mid.z - radius, self.mid.z + radius)
        } else {
            (self.min.z, self.max.z)
        };

        Bounds::new(
            Point::new(self.mid.x - radius, self.mid.y - radius, min_z),
            Point::new(self.mid.x + radius, self.mid.y + radius, max_z),
        )
    }

    /// Checks whether these bounds are a cube, to a relative tolerance.
    pub fn is_cubic(&self, is_3d: bool) -> bool {
        let w = self.width();
        let tolerance = w.abs() * 1e-9;
        let square = (w - self.depth()).abs() <= tolerance;
        if is_3d {
            square && (w - self.height()).abs() <= tolerance
        } else {
            square
        }
    }
}

fn mid_of(min: &Point, max: &Point) -> Point {
    Point::new(
        min.x / 2.0 + max.x / 2.0,
        min.y / 2.0 + max.y / 2.0,
        min.z / 2.0 + max.z / 2.0,
    )
}

impl TryFrom<Vec<f64>> for Bounds {
    type Error = CloudError;

    fn try_from(v: Vec<f64>) -> CloudResult<Bounds> {
        match v.len() {
            4 => Ok(Bounds::new_2d(v[0], v[1], v[2], v[3])),
            6 => Ok(Bounds::new(
                Point::new(v[0], v[1], v[2]),
                Point::new(v[3], v[4], v[5]),
            )),
            n => Err(CloudError::InvalidBounds(format!(
                "expected 4 or 6 values, found {}",
                n
            ))),
        }
    }
}

impl From<Bounds> for Vec<f64> {
    fn from(b: Bounds) -> Vec<f64> {
        vec![b.min.x, b.min.y, b.min.z, b.max.x, b.max.y, b.max.z]
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bounds({}, {})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(min: f64, max: f64) -> Bounds {
        Bounds::new(Point::splat(min), Point::splat(max))
    }

    #[test]
    fn test_corner_ordering() {
        let b = Bounds::new(Point::new(5.0, 0.0, 9.0), Point::new(1.0, 3.0, 2.0));
        assert_eq!(*b.min(), Point::new(1.0, 0.0, 2.0));
        assert_eq!(*b.max(), Point::new(5.0, 3.0, 9.0));
        assert_eq!(b.mid(), Point::new(3.0, 1.5, 5.5));
    }

    #[test]
    fn test_contains_faces_inclusive() {
        let b = cube(0.0, 10.0);
        assert!(b.contains(&Point::new(0.0, 0.0, 0.0)));
        assert!(b.contains(&Point::new(10.0, 10.0, 10.0)));
        assert!(b.contains(&Point::new(5.0, 0.0, 10.0)));
        assert!(!b.contains(&Point::new(-0.1, 5.0, 5.0)));
        assert!(!b.contains(&Point::new(5.0, 5.0, 10.1)));
    }

    #[test]
    fn test_overlaps_inclusive_and_exclusive() {
        let a = cube(0.0, 10.0);
        let touching = cube(10.0, 20.0);
        let inside = cube(2.0, 3.0);
        let apart = cube(11.0, 12.0);

        assert!(a.overlaps(&touching, true));
        assert!(!a.overlaps(&touching, false));
        assert!(a.overlaps(&inside, false));
        assert!(!a.overlaps(&apart, true));
    }

    #[test]
    fn test_intersection() {
        let a = cube(0.0, 10.0);
        let b = cube(5.0, 15.0);
        assert_eq!(a.intersection(&b), Some(cube(5.0, 10.0)));
        assert_eq!(a.intersection(&cube(20.0, 30.0)), None);
        assert_eq!(Bounds::everything().intersection(&a), Some(a));
    }

    #[test]
    fn test_go_octants() {
        let b = cube(0.0, 8.0);
        assert_eq!(b.get(Dir::SWD, true), cube(0.0, 4.0));
        assert_eq!(b.get(Dir::NEU, true), cube(4.0, 8.0));

        let sed = b.get(Dir::SED, true);
        assert_eq!(*sed.min(), Point::new(4.0, 0.0, 0.0));
        assert_eq!(*sed.max(), Point::new(8.0, 4.0, 4.0));
    }

    #[test]
    fn test_go_quadrant_keeps_z() {
        let b = cube(0.0, 8.0);
        let nw = b.get(Dir::NWD, false);
        assert_eq!(*nw.min(), Point::new(0.0, 4.0, 0.0));
        assert_eq!(*nw.max(), Point::new(4.0, 8.0, 8.0));
    }

    #[test]
    fn test_children_tile_parent() {
        let b = cube(-4.0, 4.0);
        let volume: f64 = Dir::all(8)
            .map(|d| {
                let c = b.get(d, true);
                c.width() * c.depth() * c.height()
            })
            .sum();
        assert_eq!(volume, b.width() * b.depth() * b.height());
    }

    #[test]
    fn test_cubeify() {
        let b = Bounds::new(Point::new(0.0, 0.0, 0.0), Point::new(10.0, 4.0, 2.0));
        let c = b.cubeify(true);
        assert!(c.is_cubic(true));
        assert_eq!(c.mid(), b.mid());
        assert!(c.contains_bounds(&b));
        assert!(!b.is_cubic(true));
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = Bounds::new(Point::new(1.0, 2.0, 3.0), Point::new(4.0, 5.0, 6.0));
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0,5.0,6.0]");
        let back: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn test_deserialize_2d() {
        let b: Bounds = serde_json::from_str("[0, 0, 10, 10]").unwrap();
        assert!(b.contains(&Point::new(5.0, 5.0, 1e12)));
        assert!(serde_json::from_str::<Bounds>("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_everything_mid_is_finite() {
        let all = Bounds::everything();
        assert_eq!(all.mid(), Point::splat(0.0));
    }
}
