use std::fmt;

use serde::{Deserialize, Serialize};

use super::DimType;
use crate::constants::{DIM_X, DIM_Y, DIM_Z};
use crate::errors::{CloudError, CloudResult};

/// A named, typed dimension.
///
/// Serialized as `{"name": "X", "type": "floating", "size": 8}`.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "DimRepr", into = "DimRepr")]
pub struct DimInfo {
    name: String,
    dim_type: DimType,
}

impl DimInfo {
    pub fn new(name: impl Into<String>, dim_type: DimType) -> DimInfo {
        DimInfo {
            name: name.into(),
            dim_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dim_type(&self) -> DimType {
        self.dim_type
    }

    pub fn size(&self) -> usize {
        self.dim_type.size()
    }
}

#[derive(Serialize, Deserialize)]
struct DimRepr {
    name: String,
    #[serde(rename = "type")]
    base: String,
    size: usize,
}

impl TryFrom<DimRepr> for DimInfo {
    type Error = CloudError;

    fn try_from(repr: DimRepr) -> CloudResult<DimInfo> {
        Ok(DimInfo::new(repr.name, DimType::from_parts(&repr.base, repr.size)?))
    }
}

impl From<DimInfo> for DimRepr {
    fn from(dim: DimInfo) -> DimRepr {
        DimRepr {
            size: dim.size(),
            base: dim.dim_type.base_name().to_string(),
            name: dim.name,
        }
    }
}

/// An ordered list of dimensions describing one fixed-size point row.
///
/// Dimension offsets are computed once at construction; a row's layout is the
/// declared dimensions back to back, in order, with no padding.
///
/// # Examples
///
/// ```rust
/// use cloudtree::{DimInfo, DimType, Schema};
///
/// let schema = Schema::new(vec![
///     DimInfo::new("X", DimType::Double),
///     DimInfo::new("Y", DimType::Double),
///     DimInfo::new("Z", DimType::Double),
///     DimInfo::new("Intensity", DimType::Unsigned16),
/// ]).unwrap();
///
/// assert_eq!(schema.point_size(), 26);
/// assert_eq!(schema.offset(3), 24);
/// ```
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<DimInfo>", into = "Vec<DimInfo>")]
pub struct Schema {
    dims: Vec<DimInfo>,
    offsets: Vec<usize>,
    point_size: usize,
}

impl Schema {
    /// Builds a schema, rejecting empty lists and duplicate names.
    pub fn new(dims: Vec<DimInfo>) -> CloudResult<Schema> {
        if dims.is_empty() {
            return Err(CloudError::InvalidSchema(
                "schema must contain at least one dimension".to_string(),
            ));
        }

        let mut offsets = Vec::with_capacity(dims.len());
        let mut point_size = 0;
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].iter().any(|d| d.name == dim.name) {
                return Err(CloudError::InvalidSchema(format!(
                    "duplicate dimension {}",
                    dim.name
                )));
            }
            offsets.push(point_size);
            point_size += dim.size();
        }

        Ok(Schema {
            dims,
            offsets,
            point_size,
        })
    }

    /// The usual positional layout: `X`, `Y`, `Z` as doubles, followed by
    /// `extra` dimensions.
    pub fn xyz(extra: Vec<DimInfo>) -> CloudResult<Schema> {
        let mut dims = vec![
            DimInfo::new(DIM_X, DimType::Double),
            DimInfo::new(DIM_Y, DimType::Double),
            DimInfo::new(DIM_Z, DimType::Double),
        ];
        dims.extend(extra);
        Schema::new(dims)
    }

    pub fn dims(&self) -> &[DimInfo] {
        &self.dims
    }

    pub fn dim(&self, index: usize) -> &DimInfo {
        &self.dims[index]
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Byte offset of dimension `index` within a row.
    pub fn offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// Position of the dimension called `name`, if any.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Positions of the `X`, `Y` and `Z` dimensions.
    pub fn positional(&self) -> CloudResult<[usize; 3]> {
        let lookup = |name: &str| {
            self.find(name).ok_or_else(|| {
                CloudError::InvalidSchema(format!("schema has no {} dimension", name))
            })
        };
        Ok([lookup(DIM_X)?, lookup(DIM_Y)?, lookup(DIM_Z)?])
    }
}

impl TryFrom<Vec<DimInfo>> for Schema {
    type Error = CloudError;

    fn try_from(dims: Vec<DimInfo>) -> CloudResult<Schema> {
        Schema::new(dims)
    }
}

impl From<Schema> for Vec<DimInfo> {
    fn from(schema: Schema) -> Vec<DimInfo> {
        schema.dims
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .dims
            .iter()
            .map(|d| format!("{}:{}", d.name, d.dim_type))
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}
