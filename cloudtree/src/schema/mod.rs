//! Point layouts and typed access to raw rows.

mod dim_type;
mod layout;
mod point_table;

pub use dim_type::{DimType, Scalar};
pub use layout::{DimInfo, Schema};
pub use point_table::{PointInfo, PointRef, PointTable};
