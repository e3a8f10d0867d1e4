use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use log::{debug, error, trace, warn};

use super::fetch_plan::plan_fetches;
use super::options::{Extent, QueryOptions, QueryParams};
use super::transcode::Transcoder;
use crate::cache::{Block, ChunkCache, ChunkSlot, FetchInfo};
use crate::errors::{CloudError, CloudResult};
use crate::filter::Filter;
use crate::geometry::Bounds;
use crate::reader::Reader;
use crate::schema::Schema;
use crate::tree::{Climber, PointState};

/// Where a query is in its traversal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueryPhase {
    NotStarted,
    DrainingBase,
    DrainingCold,
    Done,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryPhase::NotStarted => "not started",
            QueryPhase::DrainingBase => "draining base",
            QueryPhase::DrainingCold => "draining cold",
            QueryPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// A resumable spatial query.
///
/// Each call to [`Query::next`] appends matching points to the caller's
/// buffer in the output schema's layout. The base tubes are drained in full
/// on the first call; cold chunks follow in batches obtained from the cache,
/// one chunk per step, until the buffer has grown by at least
/// `min_bytes_per_iteration`. `next` returns `Ok(false)` once everything has
/// been emitted; calling it again after that is an error.
///
/// ```rust,ignore
/// let mut query = Query::new(reader, cache, QueryParams::new().depth(0, 8))?;
/// let mut buffer = Vec::new();
/// while query.next(&mut buffer)? {
///     send(&buffer);
///     buffer.clear();
/// }
/// ```
pub struct Query {
    reader: Arc<Reader>,
    cache: Arc<dyn ChunkCache>,
    options: QueryOptions,
    depth_begin: u32,
    depth_end: u32,
    empty: bool,
    transcoder: Transcoder,
    fetches: VecDeque<FetchInfo>,
    block: Option<Block>,
    chunk_index: usize,
    phase: QueryPhase,
    finished: bool,
    cache_failed: bool,
}

impl Query {
    /// Validates `params` against the index and plans the cold fetches.
    pub fn new(
        reader: Arc<Reader>,
        cache: Arc<dyn ChunkCache>,
        params: QueryParams,
    ) -> CloudResult<Query> {
        let options = *params.get_options();
        options.validate()?;

        let metadata = reader.metadata();
        let mid = metadata.mid();
        let extent = params.resolve(metadata)?;
        let Extent {
            delta,
            depth_begin,
            depth_end,
            ..
        } = extent;
        let empty = extent.is_empty();
        let local = extent.bounds.unwrap_or(*metadata.bounds());

        let filter = Filter::new(metadata, local, params.get_filter(), delta)?;
        let out_schema = match params.get_schema() {
            Some(schema) => Arc::new(schema.clone()),
            None => reader.schema().clone(),
        };

        let fetches = if empty {
            VecDeque::new()
        } else {
            plan_fetches(&reader, &filter, depth_begin, depth_end)
        };

        let transcoder = Transcoder::new(
            reader.schema().clone(),
            out_schema,
            filter,
            delta,
            mid,
            reader.scales().cloned(),
        )?;

        debug!(
            "Query on {} over {} at depths [{}, {}) with {} planned fetches",
            reader.path(),
            local,
            depth_begin,
            depth_end,
            fetches.len()
        );

        Ok(Query {
            reader,
            cache,
            options,
            depth_begin,
            depth_end,
            empty,
            transcoder,
            fetches,
            block: None,
            chunk_index: 0,
            phase: QueryPhase::NotStarted,
            finished: false,
            cache_failed: false,
        })
    }

    /// Appends the next portion of matching points to `out`.
    ///
    /// Returns `Ok(true)` while more points may follow.
    pub fn next(&mut self, out: &mut Vec<u8>) -> CloudResult<bool> {
        if self.finished {
            return Err(CloudError::QueryCompleted);
        }

        match self.advance(out) {
            Ok(()) => {}
            Err(err) => {
                if err.is_fatal() || self.cache_failed {
                    self.block = None;
                    self.fetches.clear();
                    self.set_phase(QueryPhase::Done);
                    self.finished = true;
                }
                return Err(err);
            }
        }

        if self.block.is_none() && self.fetches.is_empty() {
            self.set_phase(QueryPhase::Done);
            self.finished = true;
            return Ok(false);
        }
        Ok(true)
    }

    /// Drains the query into a fresh buffer.
    pub fn run(&mut self) -> CloudResult<Vec<u8>> {
        let mut out = Vec::new();
        while self.next(&mut out)? {}
        Ok(out)
    }

    /// Drains the query without writing any point and returns how many
    /// matched.
    pub fn count(&mut self) -> CloudResult<u64> {
        self.transcoder.count_only();
        let mut scratch = Vec::new();
        while self.next(&mut scratch)? {}
        Ok(self.num_points())
    }

    /// Points emitted so far.
    pub fn num_points(&self) -> u64 {
        self.transcoder.matched()
    }

    pub fn done(&self) -> bool {
        self.phase == QueryPhase::Done
    }

    pub fn phase(&self) -> QueryPhase {
        self.phase
    }

    /// Chunks planned but not yet requested from the cache.
    pub fn pending_fetches(&self) -> usize {
        self.fetches.len()
    }

    /// Index-space bounds the query matches against.
    pub fn bounds(&self) -> &Bounds {
        self.transcoder.filter().bounds()
    }

    pub fn depth_range(&self) -> (u32, u32) {
        (self.depth_begin, self.depth_end)
    }

    pub fn schema(&self) -> &Schema {
        self.transcoder.out_schema()
    }

    fn advance(&mut self, out: &mut Vec<u8>) -> CloudResult<()> {
        let start = out.len();

        if self.phase == QueryPhase::NotStarted {
            self.set_phase(QueryPhase::DrainingBase);
            if !self.empty {
                self.drain_base(out)?;
            }
            self.set_phase(QueryPhase::DrainingCold);
        }

        while self.block.is_some() || !self.fetches.is_empty() {
            self.step(out)?;
            if out.len() - start >= self.options.get_min_bytes_per_iteration() {
                break;
            }
        }
        Ok(())
    }

    fn drain_base(&mut self, out: &mut Vec<u8>) -> CloudResult<()> {
        let reader = self.reader.clone();
        let base = match reader.base() {
            Some(base) => base,
            None => return Ok(()),
        };
        let metadata = reader.metadata();
        let structure = metadata.structure();
        let base_begin = structure.base_depth_begin();
        let base_end = structure.base_depth_end();

        let mut stack = vec![PointState::new(structure, *metadata.bounds())];
        while let Some(state) = stack.pop() {
            if !self.transcoder.filter().check_bounds(state.bounds()) {
                continue;
            }

            let depth = state.depth();
            if depth >= base_begin && depth >= self.depth_begin {
                if let Some(tube) = base.tube(state.address()) {
                    for info in tube.iter() {
                        self.transcoder.process(&info, out)?;
                    }
                }
            }

            if depth + 1 < base_end && depth + 1 < self.depth_end {
                stack.extend(state.children().into_iter().rev());
            }
        }
        Ok(())
    }

    /// Acquires a batch if none is held, then processes one chunk of it.
    fn step(&mut self, out: &mut Vec<u8>) -> CloudResult<()> {
        if self.block.is_none() {
            let count = self.options.get_fetches_per_iteration().min(self.fetches.len());
            let batch: Vec<FetchInfo> = self.fetches.drain(..count).collect();
            let acquired = match self.cache.acquire(self.reader.path(), &batch) {
                Ok(acquired) => acquired,
                Err(err) => {
                    // The batch is not retried, so the query cannot complete.
                    error!(
                        "Acquiring {} chunks of {} failed: {}",
                        batch.len(),
                        self.reader.path(),
                        err
                    );
                    self.cache_failed = true;
                    return Err(err);
                }
            };
            match acquired {
                Some(block) => {
                    debug!(
                        "Acquired {} chunks, {} fetches remain",
                        block.len(),
                        self.fetches.len()
                    );
                    self.block = Some(block);
                    self.chunk_index = 0;
                }
                None => {
                    warn!("Cache returned nothing for {} chunks", batch.len());
                    return Ok(());
                }
            }
        }

        let exhausted = match &self.block {
            Some(block) => {
                if let Some((id, slot)) = block.chunks().get(self.chunk_index) {
                    match slot {
                        ChunkSlot::Ready(chunk) => {
                            trace!("Scanning chunk {} with {} points", id, chunk.len());
                            let bounds = *self.transcoder.filter().bounds();
                            for info in chunk.candidates(&bounds) {
                                self.transcoder.process(&info, out)?;
                            }
                        }
                        ChunkSlot::Failed(reason) => {
                            error!("Reservation failure for chunk {}: {}", id, reason);
                            return Err(CloudError::ReservationFailure {
                                chunk: *id,
                                reason: reason.clone(),
                            });
                        }
                    }
                    self.chunk_index += 1;
                }
                self.chunk_index >= block.len()
            }
            None => false,
        };

        if exhausted {
            self.block = None;
        }
        Ok(())
    }

    fn set_phase(&mut self, phase: QueryPhase) {
        if self.phase != phase {
            debug!("Query on {}: {} -> {}", self.reader.path(), self.phase, phase);
            self.phase = phase;
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("reader", &self.reader.path())
            .field("phase", &self.phase)
            .field("depth_begin", &self.depth_begin)
            .field("depth_end", &self.depth_end)
            .field("pending_fetches", &self.fetches.len())
            .field("holding_block", &self.block.is_some())
            .field("num_points", &self.num_points())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BoundedCache, CacheConfig};
    use crate::geometry::{Delta, Point};
    use crate::query::QueryOptions;
    use crate::testing::{Fixture, FixtureBuilder};
    use crate::tree::Structure;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Loads every chunk directly and records batch sizes.
    #[derive(Default)]
    struct DirectCache {
        batches: Mutex<Vec<usize>>,
        fail: bool,
        refuse: bool,
        reject: bool,
    }

    impl ChunkCache for DirectCache {
        fn acquire(&self, _path: &str, fetches: &[FetchInfo]) -> CloudResult<Option<Block>> {
            self.batches.lock().push(fetches.len());
            if self.reject {
                return Err(CloudError::QueryLimitExceeded {
                    requested: fetches.len(),
                    limit: 0,
                });
            }
            if self.refuse {
                return Ok(None);
            }
            let chunks = fetches
                .iter()
                .map(|fetch| {
                    let slot = if self.fail {
                        ChunkSlot::Failed("refused".to_string())
                    } else {
                        match fetch.load() {
                            Ok(reader) => ChunkSlot::Ready(Arc::new(reader)),
                            Err(err) => ChunkSlot::Failed(err.to_string()),
                        }
                    };
                    (fetch.chunk_id, slot)
                })
                .collect();
            Ok(Some(Block::new("direct", chunks)))
        }
    }

    fn cube() -> Bounds {
        Bounds::new(Point::splat(0.0), Point::splat(64.0))
    }

    fn structure() -> Structure {
        Structure::builder(3)
            .base_depth(0, 2)
            .nominal_chunk_depth(1)
            .build()
            .unwrap()
    }

    fn fixture(count: usize) -> Fixture {
        let mut builder = FixtureBuilder::xyz(cube(), structure(), vec![]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        builder.random(&mut rng, count, 0..5).unwrap();
        builder.build().unwrap()
    }

    fn rows(bytes: &[u8], size: usize) -> Vec<Vec<u8>> {
        assert_eq!(bytes.len() % size, 0);
        let mut rows: Vec<Vec<u8>> = bytes.chunks(size).map(|r| r.to_vec()).collect();
        rows.sort();
        rows
    }

    fn expected(fixture: &Fixture, keep: impl Fn(&crate::testing::StoredPoint) -> bool) -> Vec<Vec<u8>> {
        let mut rows: Vec<Vec<u8>> = fixture
            .select(keep)
            .into_iter()
            .map(|p| p.row.clone())
            .collect();
        rows.sort();
        rows
    }

    fn query(fixture: &Fixture, cache: Arc<dyn ChunkCache>, params: QueryParams) -> Query {
        Query::new(fixture.reader.clone(), cache, params).unwrap()
    }

    #[test]
    fn test_full_drain_returns_every_point_once() {
        let fixture = fixture(600);
        let cache = Arc::new(DirectCache::default());
        let mut q = query(&fixture, cache, QueryParams::new());

        let bytes = q.run().unwrap();
        assert_eq!(rows(&bytes, 24), expected(&fixture, |_| true));
        assert_eq!(q.num_points(), 600);
        assert!(q.done());
        assert_eq!(q.phase(), QueryPhase::Done);
    }

    #[test]
    fn test_base_points_come_first() {
        let fixture = fixture(400);
        let cache = Arc::new(DirectCache::default());
        let mut q = query(&fixture, cache, QueryParams::new());
        let bytes = q.run().unwrap();

        let base = expected(&fixture, |p| p.depth < 2);
        assert!(!base.is_empty());
        let head = rows(&bytes[..base.len() * 24], 24);
        assert_eq!(head, base);
    }

    #[test]
    fn test_bounds_and_depth_range() {
        let fixture = fixture(800);
        let bounds = Bounds::new(Point::new(5.0, 10.0, 0.0), Point::new(40.0, 33.0, 20.0));
        let cache = Arc::new(DirectCache::default());
        let mut q = query(
            &fixture,
            cache,
            QueryParams::new().bounds(bounds).depth(1, 4),
        );

        let bytes = q.run().unwrap();
        let want = expected(&fixture, |p| {
            bounds.contains(&p.point) && p.depth >= 1 && p.depth < 4
        });
        assert!(!want.is_empty());
        assert_eq!(rows(&bytes, 24), want);
    }

    #[test]
    fn test_batches_respect_fetch_limit() {
        let fixture = fixture(600);
        let cache = Arc::new(DirectCache::default());
        let options = QueryOptions::new().fetches_per_iteration(2);
        let mut q = query(&fixture, cache.clone(), QueryParams::new().options(options));
        let planned = q.pending_fetches();
        assert!(planned > 2);

        q.run().unwrap();
        let batches = cache.batches.lock();
        assert!(batches.iter().all(|&n| n >= 1 && n <= 2));
        assert_eq!(batches.iter().sum::<usize>(), planned);
        assert_eq!(q.pending_fetches(), 0);
    }

    #[test]
    fn test_resumable_with_zero_min_bytes() {
        let fixture = fixture(500);
        let whole = query(&fixture, Arc::new(DirectCache::default()), QueryParams::new())
            .run()
            .unwrap();

        let options = QueryOptions::new()
            .min_bytes_per_iteration(0)
            .fetches_per_iteration(3);
        let mut q = query(
            &fixture,
            Arc::new(DirectCache::default()),
            QueryParams::new().options(options),
        );
        let mut bytes = Vec::new();
        let mut calls = 0;
        while q.next(&mut bytes).unwrap() {
            calls += 1;
        }
        assert!(calls > 1);
        assert_eq!(bytes, whole);
    }

    #[test]
    fn test_next_only_appends() {
        let fixture = fixture(50);
        let mut q = query(&fixture, Arc::new(DirectCache::default()), QueryParams::new());
        let mut bytes = vec![1, 2, 3];
        while q.next(&mut bytes).unwrap() {}
        assert_eq!(&bytes[..3], &[1, 2, 3]);
        assert_eq!(bytes.len(), 3 + 50 * 24);
    }

    #[test]
    fn test_next_after_completion() {
        let fixture = fixture(20);
        let mut q = query(&fixture, Arc::new(DirectCache::default()), QueryParams::new());
        q.run().unwrap();
        let err = q.next(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, CloudError::QueryCompleted));
    }

    #[test]
    fn test_failed_slot_is_fatal() {
        let fixture = fixture(300);
        let cache = Arc::new(DirectCache {
            fail: true,
            ..Default::default()
        });
        let mut q = query(&fixture, cache, QueryParams::new());
        assert!(q.pending_fetches() > 0);

        let mut bytes = Vec::new();
        let err = loop {
            match q.next(&mut bytes) {
                Ok(true) => continue,
                Ok(false) => panic!("query finished despite failed chunks"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, CloudError::ReservationFailure { .. }));
        assert!(err.is_fatal());
        assert!(q.done());
        assert!(matches!(q.next(&mut bytes), Err(CloudError::QueryCompleted)));
    }

    #[test]
    fn test_acquire_error_drops_batch_and_ends_query() {
        let fixture = fixture(300);
        let cache = Arc::new(DirectCache {
            reject: true,
            ..Default::default()
        });
        let options = QueryOptions::new().fetches_per_iteration(3);
        let mut q = query(&fixture, cache.clone(), QueryParams::new().options(options));
        let planned = q.pending_fetches();
        assert!(planned > 3);

        let mut bytes = Vec::new();
        let err = q.next(&mut bytes).unwrap_err();
        assert!(matches!(err, CloudError::QueryLimitExceeded { requested: 3, .. }));
        assert!(q.pending_fetches() < planned);
        assert!(q.done());
        assert!(matches!(q.next(&mut bytes), Err(CloudError::QueryCompleted)));

        // The failed batch was requested once and never again.
        assert_eq!(*cache.batches.lock(), vec![3]);
    }

    #[test]
    fn test_index_delta_is_composed() {
        let metadata = fixture(1).reader.metadata().clone();
        let scaled = metadata.with_delta(Delta::uniform(2.0).unwrap());
        let mut builder = FixtureBuilder::new(scaled).unwrap();
        // Stored at 40, which is 36 in absolute space around the centre 32.
        builder.point(3, Point::splat(40.0), &[]).unwrap();
        builder.point(0, Point::splat(20.0), &[]).unwrap();
        let fixture = builder.build().unwrap();

        let read_x = |bytes: &[u8]| -> Vec<f64> {
            let mut xs: Vec<f64> = bytes
                .chunks(24)
                .map(|r| f64::from_le_bytes(r[..8].try_into().unwrap()))
                .collect();
            xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
            xs
        };

        let absolute = query(&fixture, Arc::new(DirectCache::default()), QueryParams::new())
            .run()
            .unwrap();
        assert_eq!(read_x(&absolute), vec![26.0, 36.0]);

        // Bounds are in absolute space too.
        let bounds = Bounds::new(Point::splat(30.0), Point::splat(40.0));
        let boxed = query(
            &fixture,
            Arc::new(DirectCache::default()),
            QueryParams::new().bounds(bounds),
        )
        .run()
        .unwrap();
        assert_eq!(read_x(&boxed), vec![36.0]);

        // Asking for the stored scale returns stored coordinates.
        let stored = query(
            &fixture,
            Arc::new(DirectCache::default()),
            QueryParams::new().delta(Delta::uniform(2.0).unwrap()),
        )
        .run()
        .unwrap();
        assert_eq!(read_x(&stored), vec![20.0, 40.0]);
    }

    #[test]
    fn test_refused_batches_are_skipped() {
        let fixture = fixture(300);
        let cache = Arc::new(DirectCache {
            refuse: true,
            ..Default::default()
        });
        let mut q = query(&fixture, cache.clone(), QueryParams::new());
        let planned = q.pending_fetches();
        let bytes = q.run().unwrap();

        assert_eq!(rows(&bytes, 24), expected(&fixture, |p| p.depth < 2));
        assert_eq!(cache.batches.lock().iter().sum::<usize>(), planned);
    }

    #[test]
    fn test_count_matches_run() {
        let fixture = fixture(400);
        let bounds = Bounds::new(Point::splat(16.0), Point::splat(48.0));
        let params = QueryParams::new().bounds(bounds);
        let bytes = query(&fixture, Arc::new(DirectCache::default()), params.clone())
            .run()
            .unwrap();
        let mut q = query(&fixture, Arc::new(DirectCache::default()), params);
        assert_eq!(q.count().unwrap() as usize, bytes.len() / 24);
    }

    #[test]
    fn test_scale_keeps_centre_fixed() {
        let mut builder = FixtureBuilder::xyz(cube(), structure(), vec![]).unwrap();
        builder.point(3, Point::splat(32.0), &[]).unwrap();
        builder.point(3, Point::new(32.4, 32.0, 32.0), &[]).unwrap();
        builder.point(3, Point::splat(33.0), &[]).unwrap();
        builder.point(0, Point::splat(31.0), &[]).unwrap();
        let fixture = builder.build().unwrap();

        let delta = Delta::uniform(2.0).unwrap();
        let bounds = Bounds::new(Point::splat(31.0), Point::splat(33.0));
        let mut q = query(
            &fixture,
            Arc::new(DirectCache::default()),
            QueryParams::new().bounds(bounds).delta(delta),
        );
        let bytes = q.run().unwrap();
        let xs: Vec<f64> = bytes
            .chunks(24)
            .map(|r| f64::from_le_bytes(r[..8].try_into().unwrap()))
            .collect();
        let mut sorted = xs.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, vec![32.0, 32.8]);
    }

    #[test]
    fn test_disjoint_bounds_yield_nothing() {
        let fixture = fixture(100);
        let far = Bounds::new(Point::splat(100.0), Point::splat(200.0));
        let mut q = query(
            &fixture,
            Arc::new(DirectCache::default()),
            QueryParams::new().bounds(far),
        );
        assert_eq!(q.pending_fetches(), 0);
        let mut bytes = Vec::new();
        assert!(!q.next(&mut bytes).unwrap());
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_zero_fetches_rejected() {
        let fixture = fixture(10);
        let options = QueryOptions::new().fetches_per_iteration(0);
        let err = Query::new(
            fixture.reader.clone(),
            Arc::new(DirectCache::default()),
            QueryParams::new().options(options),
        )
        .err()
        .unwrap();
        assert!(matches!(err, CloudError::InvalidOperation(_)));
    }

    #[test]
    fn test_drains_through_bounded_cache() {
        let fixture = fixture(600);
        let cache = Arc::new(BoundedCache::new(CacheConfig::new().max_chunks(16)));
        let options = QueryOptions::new().fetches_per_iteration(4);
        let bytes = query(&fixture, cache.clone(), QueryParams::new().options(options))
            .run()
            .unwrap();
        assert_eq!(rows(&bytes, 24), expected(&fixture, |_| true));
        assert_eq!(cache.stats().active, 0);
    }
}
