//! Index-wide description loaded once per reader.

use serde::{Deserialize, Serialize};

use crate::errors::{CloudError, CloudResult};
use crate::geometry::{Bounds, Delta, Point};
use crate::schema::Schema;
use crate::tree::Structure;

/// Everything a reader needs to know about an index before touching storage.
///
/// `bounds` is the cube the tree subdivides. `bounds_conforming`, when
/// present, is the tight extent of the data inside that cube. `delta`, when
/// present, is the transform the builder applied to absolute coordinates
/// before storing them; queries are composed with it.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    bounds: Bounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bounds_conforming: Option<Bounds>,
    schema: Schema,
    structure: Structure,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    srs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    num_points: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<Delta>,
}

impl Metadata {
    /// Creates metadata, checking that `bounds` is a cube and that `schema`
    /// carries positional dimensions.
    pub fn new(bounds: Bounds, schema: Schema, structure: Structure) -> CloudResult<Metadata> {
        let metadata = Metadata {
            bounds,
            bounds_conforming: None,
            schema,
            structure,
            srs: String::new(),
            num_points: None,
            delta: None,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Parses and validates metadata from its JSON form.
    pub fn from_json(json: &str) -> CloudResult<Metadata> {
        let metadata: Metadata = serde_json::from_str(json)?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn to_json(&self) -> CloudResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_conforming(mut self, bounds: Bounds) -> Self {
        self.bounds_conforming = Some(bounds);
        self
    }

    pub fn with_srs(mut self, srs: impl Into<String>) -> Self {
        self.srs = srs.into();
        self
    }

    pub fn with_num_points(mut self, num_points: u64) -> Self {
        self.num_points = Some(num_points);
        self
    }

    /// Records the transform stored coordinates went through.
    pub fn with_delta(mut self, delta: Delta) -> Self {
        self.delta = Some(delta);
        self
    }

    fn validate(&self) -> CloudResult<()> {
        let is_3d = self.structure.is_3d();
        if !self.bounds.is_cubic(is_3d) {
            return Err(CloudError::InvalidBounds(format!(
                "index bounds {} are not a cube",
                self.bounds
            )));
        }
        self.schema.positional()?;
        Ok(())
    }

    /// The cube the tree subdivides.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Tight data extent, falling back to the cube.
    pub fn bounds_conforming(&self) -> &Bounds {
        self.bounds_conforming.as_ref().unwrap_or(&self.bounds)
    }

    /// Centre of the cube, the fixed point of every delta.
    pub fn mid(&self) -> Point {
        self.bounds.mid()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn srs(&self) -> &str {
        &self.srs
    }

    pub fn num_points(&self) -> Option<u64> {
        self.num_points
    }

    pub fn delta(&self) -> Option<&Delta> {
        self.delta.as_ref()
    }
}
