//! Index handle shared by every query against one dataset.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Deserialize;

use crate::constants::{BASE_FILE, IDS_FILE, METADATA_FILE, SCALES_FILE};
use crate::errors::{CloudError, CloudResult};
use crate::metadata::Metadata;
use crate::schema::Schema;
use crate::storage::{BaseData, ChunkSource};
use crate::tree::ChunkId;

/// Ties together an index's metadata, its in-memory base, the source its
/// cold chunks are read from and the set of chunks that exist.
///
/// A reader is immutable once built and is shared between queries through
/// an `Arc`.
///
/// A reader is either opened from the index files its source holds, or
/// assembled from parts.
///
/// # Examples
///
/// ```rust,ignore
/// let reader = Reader::open("tiles", Arc::new(FsSource::new("/data/tiles")))?;
///
/// let reader = Reader::new("tiles", metadata, source)
///     .with_base(base)?
///     .with_chunk_ids(source_ids);
/// ```
#[derive(Clone)]
pub struct Reader {
    path: String,
    metadata: Arc<Metadata>,
    schema: Arc<Schema>,
    base: Option<Arc<BaseData>>,
    source: Arc<dyn ChunkSource>,
    ids: HashSet<ChunkId>,
    scales: Option<Arc<HashMap<u64, f64>>>,
}

impl Reader {
    pub fn new(path: impl Into<String>, metadata: Metadata, source: Arc<dyn ChunkSource>) -> Reader {
        let schema = Arc::new(metadata.schema().clone());
        Reader {
            path: path.into(),
            metadata: Arc::new(metadata),
            schema,
            base: None,
            source,
            ids: HashSet::new(),
            scales: None,
        }
    }

    /// Opens the index stored in `source`.
    ///
    /// The metadata is always required. The base tubes are required when the
    /// structure has base depths and the chunk id list when it has cold
    /// depths. The calibration table is optional.
    pub fn open(path: impl Into<String>, source: Arc<dyn ChunkSource>) -> CloudResult<Reader> {
        let path = path.into();
        let metadata = read_file(source.as_ref(), METADATA_FILE)?;
        let metadata = std::str::from_utf8(&metadata).map_err(|e| {
            CloudError::Encoding(format!("{} is not UTF-8: {}", METADATA_FILE, e))
        })?;
        let metadata = Metadata::from_json(metadata)?;
        let structure = metadata.structure().clone();

        let mut reader = Reader::new(path, metadata, source.clone());

        if structure.has_base() {
            let bytes = read_file(source.as_ref(), BASE_FILE)?;
            let base = BaseData::from_bytes(reader.schema.clone(), &bytes)?;
            reader = reader.with_base(base)?;
        }

        if structure.has_cold() {
            let ids: Vec<u64> = serde_json::from_slice(&read_file(source.as_ref(), IDS_FILE)?)?;
            reader = reader.with_chunk_ids(ids.into_iter().map(ChunkId::new));
        }

        match source.get_file(SCALES_FILE)? {
            Some(bytes) => {
                let scales: ScalesRepr = serde_json::from_slice(&bytes)?;
                let scales = scales.into_map();
                info!("Reader {} calibrates {} origins", reader.path, scales.len());
                reader = reader.with_scales(scales);
            }
            None => debug!("Reader {} has no calibration table", reader.path),
        }

        info!(
            "Opened {} with {} cold chunks from {}",
            reader.path,
            reader.ids.len(),
            source.path()
        );
        Ok(reader)
    }

    /// Attaches the in-memory base tubes.
    pub fn with_base(mut self, base: BaseData) -> CloudResult<Reader> {
        if base.schema().as_ref() != self.schema.as_ref() {
            return Err(CloudError::InvalidSchema(
                "base data does not use the index schema".to_string(),
            ));
        }
        debug!(
            "Reader {} attached base with {} tubes and {} points",
            self.path,
            base.num_tubes(),
            base.num_points()
        );
        self.base = Some(Arc::new(base));
        Ok(self)
    }

    /// Registers the cold chunks known to exist.
    pub fn with_chunk_ids(mut self, ids: impl IntoIterator<Item = ChunkId>) -> Reader {
        self.ids.extend(ids);
        self
    }

    /// Attaches the per-origin intensity calibration table.
    pub fn with_scales(mut self, scales: HashMap<u64, f64>) -> Reader {
        self.scales = Some(Arc::new(scales));
        self
    }

    /// Storage key prefix used by the cache.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Schema of stored points.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn base(&self) -> Option<&BaseData> {
        self.base.as_deref()
    }

    pub fn source(&self) -> &Arc<dyn ChunkSource> {
        &self.source
    }

    /// Whether the cold chunk `id` exists.
    pub fn exists(&self, id: ChunkId) -> bool {
        self.ids.contains(&id)
    }

    pub fn num_chunks(&self) -> usize {
        self.ids.len()
    }

    /// Every registered cold chunk id, ascending.
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.ids.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn scales(&self) -> Option<&Arc<HashMap<u64, f64>>> {
        self.scales.as_ref()
    }
}

fn read_file(source: &dyn ChunkSource, name: &str) -> CloudResult<Vec<u8>> {
    source.get_file(name)?.ok_or_else(|| {
        warn!("Index file {} is missing from {}", name, source.path());
        CloudError::MissingFile(name.to_string())
    })
}

/// Calibration scales on storage: a list indexed by origin id, or an object
/// keyed by it for tables with gaps.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalesRepr {
    List(Vec<f64>),
    Map(HashMap<u64, f64>),
}

impl ScalesRepr {
    fn into_map(self) -> HashMap<u64, f64> {
        match self {
            ScalesRepr::List(scales) => scales
                .into_iter()
                .enumerate()
                .map(|(origin, scale)| (origin as u64, scale))
                .collect(),
            ScalesRepr::Map(scales) => scales,
        }
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("source", &self.source.path())
            .field("chunks", &self.ids.len())
            .field("has_base", &self.base.is_some())
            .field("calibrated", &self.scales.is_some())
            .finish()
    }
}
