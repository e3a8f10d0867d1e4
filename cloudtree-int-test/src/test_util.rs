use std::sync::Arc;
use std::time::Instant;

use cloudtree::cache::{Block, FetchInfo};
use cloudtree::schema::{DimInfo, DimType, Scalar};
use cloudtree::storage::{ChunkSource, FsSource};
use cloudtree::testing::{Fixture, FixtureBuilder, StoredPoint};
use cloudtree::{
    BoundedCache, Bounds, CacheConfig, ChunkCache, CloudResult, Point, Query, QueryParams, Reader,
    Structure,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

/// Runs a test against a freshly built context and reports failures with
/// the time they took.
pub fn run_test<B, T>(before: B, test: T)
where
    B: Fn() -> CloudResult<TestContext>,
    T: Fn(TestContext) -> CloudResult<()>,
{
    let start = Instant::now();
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };
    if let Err(e) = test(ctx) {
        eprintln!("\n==================== TEST FAILED ====================");
        eprintln!("Took {:?}", start.elapsed());
        panic!("Test failed: {:?}", e);
    }
}

/// An index plus a cache to query it through.
#[derive(Clone)]
pub struct TestContext {
    fixture: Arc<Fixture>,
    cache: Arc<BoundedCache>,
    dir: Option<Arc<TempDir>>,
}

impl TestContext {
    pub fn new(fixture: Fixture, cache: BoundedCache) -> Self {
        Self {
            fixture: Arc::new(fixture),
            cache: Arc::new(cache),
            dir: None,
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    pub fn reader(&self) -> Arc<Reader> {
        self.fixture.reader.clone()
    }

    pub fn cache(&self) -> Arc<BoundedCache> {
        self.cache.clone()
    }

    pub fn dir(&self) -> Option<&TempDir> {
        self.dir.as_deref()
    }

    pub fn point_size(&self) -> usize {
        self.fixture.reader.schema().point_size()
    }

    pub fn query(&self, params: QueryParams) -> CloudResult<Query> {
        Query::new(self.reader(), self.cache.clone(), params)
    }

    /// Drains a query and returns its rows, sorted.
    pub fn rows(&self, params: QueryParams) -> CloudResult<Vec<Vec<u8>>> {
        let bytes = self.query(params)?.run()?;
        Ok(sorted_rows(&bytes, self.point_size()))
    }

    /// Stored rows for which `keep` holds, sorted.
    pub fn expected(&self, keep: impl Fn(&StoredPoint) -> bool) -> Vec<Vec<u8>> {
        let mut rows: Vec<Vec<u8>> = self
            .fixture
            .select(keep)
            .into_iter()
            .map(|p| p.row.clone())
            .collect();
        rows.sort();
        rows
    }
}

pub fn sorted_rows(bytes: &[u8], size: usize) -> Vec<Vec<u8>> {
    assert_eq!(bytes.len() % size, 0, "buffer holds a partial row");
    let mut rows: Vec<Vec<u8>> = bytes.chunks(size).map(|row| row.to_vec()).collect();
    rows.sort();
    rows
}

pub fn cube() -> Bounds {
    Bounds::new(Point::splat(0.0), Point::splat(256.0))
}

/// Base at depths 0 and 1, cold chunks from depth 2 on.
pub fn standard_structure() -> Structure {
    Structure::builder(3)
        .base_depth(0, 2)
        .nominal_chunk_depth(1)
        .build()
        .expect("valid structure")
}

/// Extra dimensions stored after X, Y and Z.
pub fn extra_dims() -> Vec<DimInfo> {
    vec![
        DimInfo::new("Intensity", DimType::Unsigned16),
        DimInfo::new("Classification", DimType::Unsigned8),
        DimInfo::new("OriginId", DimType::Unsigned32),
    ]
}

pub fn random_builder(count: usize, seed: u64) -> CloudResult<FixtureBuilder> {
    let mut builder = FixtureBuilder::xyz(cube(), standard_structure(), extra_dims())?;
    let mut rng = StdRng::seed_from_u64(seed);
    builder.random(&mut rng, count, 0..6)?;
    Ok(builder)
}

pub fn create_test_context() -> CloudResult<TestContext> {
    create_sized_context(2000, CacheConfig::new().max_chunks(64))
}

pub fn create_sized_context(count: usize, config: CacheConfig) -> CloudResult<TestContext> {
    let fixture = random_builder(count, 11)?.build()?;
    Ok(TestContext::new(fixture, BoundedCache::new(config)))
}

/// Same points as [`create_test_context`], with chunks and index files
/// written to a temporary directory and opened through an [`FsSource`].
pub fn create_fs_test_context() -> CloudResult<TestContext> {
    let fixture = random_builder(2000, 11)?.build()?;
    let dir = tempfile::tempdir()?;
    let fs = FsSource::new(dir.path());
    for id in fixture.source.ids() {
        fs.put(id, &fixture.source.get(id)?)?;
    }
    for name in fixture.source.file_names() {
        if let Some(bytes) = fixture.source.get_file(&name)? {
            fs.put_file(&name, &bytes)?;
        }
    }

    let reader = Reader::open(dir.path().to_string_lossy(), Arc::new(fs))?;

    let fixture = Fixture {
        reader: Arc::new(reader),
        source: fixture.source,
        points: fixture.points,
    };
    Ok(TestContext {
        fixture: Arc::new(fixture),
        cache: Arc::new(BoundedCache::new(CacheConfig::new().max_chunks(64))),
        dir: Some(Arc::new(dir)),
    })
}

/// Extra values in [`extra_dims`] order.
pub fn extras(intensity: u16, classification: u8, origin: u32) -> Vec<Scalar> {
    vec![
        Scalar::Unsigned(intensity as u64),
        Scalar::Unsigned(classification as u64),
        Scalar::Unsigned(origin as u64),
    ]
}

/// A cache wrapper recording the size of every requested batch.
pub struct RecordingCache {
    inner: BoundedCache,
    batches: Mutex<Vec<usize>>,
}

impl RecordingCache {
    pub fn new(inner: BoundedCache) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }
}

impl ChunkCache for RecordingCache {
    fn acquire(&self, path: &str, fetches: &[FetchInfo]) -> CloudResult<Option<Block>> {
        self.batches.lock().push(fetches.len());
        self.inner.acquire(path, fetches)
    }
}
