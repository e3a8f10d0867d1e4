//! Points, directions, boxes and the output-space transform.

mod bounds;
mod delta;
mod dir;
mod point;

pub use bounds::Bounds;
pub use delta::Delta;
pub use dir::Dir;
pub use point::Point;
