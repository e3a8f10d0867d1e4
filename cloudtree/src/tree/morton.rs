//! Morton (Z-order) keys for ordering points inside one chunk.
//!
//! A chunk reader sorts its rows by the Morton key of each point relative to
//! the chunk's bounds. Interleaving preserves componentwise order: if `p <= q`
//! on every axis then `key(p) <= key(q)`. Every point inside a query box
//! therefore has a key between the keys of the box's two corners, which turns
//! a spatial lookup into one contiguous range of the sorted rows.
//!
//! The range over-includes points whose key falls between the corners without
//! the point itself being inside the box, so callers still test containment.

use crate::constants::MORTON_BITS;
use crate::geometry::{Bounds, Point};

/// Quantizes `v` onto a `2^MORTON_BITS` grid spanning `[min, max]`. Values
/// outside the range are clamped.
#[inline]
fn quantize(v: f64, min: f64, max: f64) -> u64 {
    let cells = (1u64 << MORTON_BITS) as f64;
    let range = max - min;
    if range <= 0.0 || !range.is_finite() {
        return 0;
    }
    let norm = ((v - min) / range).clamp(0.0, 1.0);
    let cell = (norm * cells) as u64;
    cell.min((1u64 << MORTON_BITS) - 1)
}

/// Spreads the low 16 bits of `v` so that two zero bits follow each one.
#[inline]
fn spread(v: u64) -> u64 {
    let mut x = v & 0xffff;
    x = (x | (x << 16)) & 0x0000_ff00_00ff;
    x = (x | (x << 8)) & 0x00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x2492_4924_9249;
    x
}

/// Morton key of `p` relative to `bounds`.
///
/// # Example
/// ```
/// use cloudtree::tree::morton::morton_key;
/// use cloudtree::{Bounds, Point};
///
/// let b = Bounds::new(Point::splat(0.0), Point::splat(1.0));
/// assert_eq!(morton_key(&Point::splat(0.0), &b), 0);
/// assert!(morton_key(&Point::splat(0.25), &b) < morton_key(&Point::splat(0.75), &b));
/// ```
pub fn morton_key(p: &Point, bounds: &Bounds) -> u64 {
    let (min, max) = (bounds.min(), bounds.max());
    let x = quantize(p.x, min.x, max.x);
    let y = quantize(p.y, min.y, max.y);
    let z = quantize(p.z, min.z, max.z);
    spread(x) | (spread(y) << 1) | (spread(z) << 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_spread() {
        assert_eq!(spread(0b1), 0b1);
        assert_eq!(spread(0b11), 0b1001);
        assert_eq!(spread(0b101), 0b1000001);
        assert_eq!(spread(0xffff).count_ones(), 16);
    }

    #[test]
    fn test_corners() {
        let b = Bounds::new(Point::splat(-10.0), Point::splat(10.0));
        assert_eq!(morton_key(b.min(), &b), 0);
        assert_eq!(morton_key(b.max(), &b), (1u64 << (3 * MORTON_BITS)) - 1);
    }

    #[test]
    fn test_outside_points_clamped() {
        let b = Bounds::new(Point::splat(0.0), Point::splat(1.0));
        assert_eq!(morton_key(&Point::splat(-5.0), &b), 0);
        assert_eq!(
            morton_key(&Point::splat(5.0), &b),
            morton_key(&Point::splat(1.0), &b)
        );
    }

    #[test]
    fn test_degenerate_axis() {
        let b = Bounds::new(Point::new(0.0, 0.0, 3.0), Point::new(1.0, 1.0, 3.0));
        let k = morton_key(&Point::new(1.0, 1.0, 3.0), &b);
        assert_eq!(k & (spread(0xffff) << 2), 0);
    }

    #[test]
    fn test_componentwise_monotone() {
        let b = Bounds::new(Point::splat(0.0), Point::splat(100.0));
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let p = Point::new(
                rng.gen_range(0.0..100.0),
                rng.gen_range(0.0..100.0),
                rng.gen_range(0.0..100.0),
            );
            let q = Point::new(
                rng.gen_range(p.x..=100.0),
                rng.gen_range(p.y..=100.0),
                rng.gen_range(p.z..=100.0),
            );
            assert!(morton_key(&p, &b) <= morton_key(&q, &b));
        }
    }
}
