use std::fmt;

use super::Point;

/// Child direction within a subdivided node.
///
/// Bit 0 selects east, bit 1 north, bit 2 up. Quadtrees only use the first
/// four directions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Dir(u8);

impl Dir {
    pub const SWD: Dir = Dir(0);
    pub const SED: Dir = Dir(1);
    pub const NWD: Dir = Dir(2);
    pub const NED: Dir = Dir(3);
    pub const SWU: Dir = Dir(4);
    pub const SEU: Dir = Dir(5);
    pub const NWU: Dir = Dir(6);
    pub const NEU: Dir = Dir(7);

    /// Builds a direction from its integral value. Values are taken modulo 8.
    pub const fn from_index(index: usize) -> Dir {
        Dir((index % 8) as u8)
    }

    /// Direction of `p` relative to the origin `o`. Points on a splitting plane
    /// belong to the upper half.
    pub fn of(p: &Point, o: &Point, is_3d: bool) -> Dir {
        let mut v = 0u8;
        if p.x >= o.x {
            v |= 1;
        }
        if p.y >= o.y {
            v |= 2;
        }
        if is_3d && p.z >= o.z {
            v |= 4;
        }
        Dir(v)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_east(self) -> bool {
        self.0 & 1 != 0
    }

    pub const fn is_north(self) -> bool {
        self.0 & 2 != 0
    }

    pub const fn is_up(self) -> bool {
        self.0 & 4 != 0
    }

    /// All directions for a tree with the given branching factor.
    pub fn all(factor: usize) -> impl DoubleEndedIterator<Item = Dir> {
        (0..factor).map(Dir::from_index)
    }
}

impl fmt::Display for Dir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = if self.is_north() { 'n' } else { 's' };
        let ew = if self.is_east() { 'e' } else { 'w' };
        let ud = if self.is_up() { 'u' } else { 'd' };
        write!(f, "{}{}{}", ns, ew, ud)
    }
}
