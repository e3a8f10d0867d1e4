use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_FETCHES_PER_ITERATION, DEFAULT_MIN_BYTES_PER_ITERATION};
use crate::errors::{CloudError, CloudResult};
use crate::filter::Predicate;
use crate::geometry::{Bounds, Delta};
use crate::metadata::Metadata;
use crate::schema::Schema;

/// Pacing of the cold phase of a query.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    fetches_per_iteration: usize,
    min_bytes_per_iteration: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            fetches_per_iteration: DEFAULT_FETCHES_PER_ITERATION,
            min_bytes_per_iteration: DEFAULT_MIN_BYTES_PER_ITERATION,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks requested from the cache in one acquisition.
    pub fn fetches_per_iteration(mut self, fetches: usize) -> Self {
        self.fetches_per_iteration = fetches;
        self
    }

    /// Buffer growth after which `next` returns. Zero means one step per
    /// call.
    pub fn min_bytes_per_iteration(mut self, bytes: usize) -> Self {
        self.min_bytes_per_iteration = bytes;
        self
    }

    pub fn get_fetches_per_iteration(&self) -> usize {
        self.fetches_per_iteration
    }

    pub fn get_min_bytes_per_iteration(&self) -> usize {
        self.min_bytes_per_iteration
    }

    pub fn validate(&self) -> CloudResult<()> {
        if self.fetches_per_iteration == 0 {
            return Err(CloudError::InvalidOperation(
                "fetches per iteration must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything that describes one query.
///
/// Bounds are in output space, that is after the delta is applied. The depth
/// range is half open; an absent end means every stored depth. A range whose
/// end does not exceed its begin is rejected when the query is built.
#[derive(Clone, Debug)]
pub struct QueryParams {
    bounds: Bounds,
    depth_begin: u32,
    depth_end: Option<u32>,
    delta: Option<Delta>,
    filter: Option<Predicate>,
    schema: Option<Schema>,
    options: QueryOptions,
}

impl Default for QueryParams {
    fn default() -> Self {
        QueryParams {
            bounds: Bounds::everything(),
            depth_begin: 0,
            depth_end: None,
            delta: None,
            filter: None,
            schema: None,
            options: QueryOptions::default(),
        }
    }
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn depth(mut self, begin: u32, end: u32) -> Self {
        self.depth_begin = begin;
        self.depth_end = Some(end);
        self
    }

    pub fn depth_begin(mut self, begin: u32) -> Self {
        self.depth_begin = begin;
        self
    }

    pub fn depth_end(mut self, end: u32) -> Self {
        self.depth_end = Some(end);
        self
    }

    pub fn delta(mut self, delta: Delta) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    /// Parses the filter from its JSON form.
    pub fn filter_json(self, json: &str) -> CloudResult<Self> {
        let predicate = Predicate::from_json(json)?;
        Ok(self.filter(predicate))
    }

    /// Output layout. Defaults to the storage schema.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn get_bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn get_depth_begin(&self) -> u32 {
        self.depth_begin
    }

    pub fn get_depth_end(&self) -> Option<u32> {
        self.depth_end
    }

    pub fn get_delta(&self) -> Option<&Delta> {
        self.delta.as_ref()
    }

    pub fn get_filter(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    pub fn get_schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn get_options(&self) -> &QueryOptions {
        &self.options
    }

    /// Expresses these parameters in the index space of `metadata`.
    pub(crate) fn resolve(&self, metadata: &Metadata) -> CloudResult<Extent> {
        if let Some(end) = self.depth_end {
            if self.depth_begin >= end {
                return Err(CloudError::InvalidOperation(format!(
                    "invalid depth range [{}, {})",
                    self.depth_begin, end
                )));
            }
        }
        let depth_end = self
            .depth_end
            .unwrap_or(u32::MAX)
            .min(metadata.structure().depth_limit());

        let delta = match (self.delta, metadata.delta()) {
            (Some(query), Some(built_in)) => Some(query.relative_to(built_in)?),
            (None, Some(built_in)) => Some(Delta::identity().relative_to(built_in)?),
            (query, None) => query,
        }
        .filter(|delta| !delta.is_identity());

        let mid = metadata.mid();
        let requested = match &delta {
            Some(delta) => delta.localize(&self.bounds, &mid),
            None => self.bounds,
        };

        Ok(Extent {
            delta,
            bounds: requested.intersection(metadata.bounds()),
            depth_begin: self.depth_begin,
            depth_end,
        })
    }
}

/// Query parameters resolved against one index.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Extent {
    /// Transform from stored to output coordinates, absent when it would be
    /// the identity.
    pub delta: Option<Delta>,
    /// Requested bounds in index space clipped to the cube, `None` when they
    /// miss it.
    pub bounds: Option<Bounds>,
    pub depth_begin: u32,
    /// Requested end capped at the deepest stored depth.
    pub depth_end: u32,
}

impl Extent {
    pub fn is_empty(&self) -> bool {
        self.bounds.is_none() || self.depth_begin >= self.depth_end
    }
}
