use std::sync::{Arc, Barrier};
use std::thread;

use cloudtree::{
    BoundedCache, CacheConfig, CloudError, CloudResult, Query, QueryOptions, QueryParams,
};
use cloudtree_int_test::test_util::{
    create_sized_context, create_test_context, random_builder, run_test, sorted_rows,
    TestContext,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

fn large_cache_context() -> CloudResult<TestContext> {
    create_sized_context(2000, CacheConfig::new().max_chunks(4096))
}

#[test]
fn test_concurrent_queries_share_cache() {
    run_test(large_cache_context, |ctx| {
        let num_threads = 6;
        let barrier = Arc::new(Barrier::new(num_threads));
        let expected = ctx.expected(|_| true);

        let mut handles = vec![];
        for thread_id in 0..num_threads {
            let ctx = ctx.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let options = QueryOptions::new()
                    .fetches_per_iteration(1 + thread_id % 4)
                    .min_bytes_per_iteration(thread_id * 512);
                let bytes = ctx.query(QueryParams::new().options(options))?.run()?;
                Ok::<_, CloudError>(sorted_rows(&bytes, ctx.point_size()))
            }));
        }

        for handle in handles {
            let rows = handle.join().expect("query thread panicked")?;
            assert_eq!(rows, expected);
        }

        let stats = ctx.cache().stats();
        assert_eq!(stats.active, 0);
        assert!(stats.hits > 0);
        assert_eq!(stats.inactive, ctx.fixture().source.ids().len());
        Ok(())
    })
}

#[test]
fn test_chunks_read_at_most_once_while_cached() {
    run_test(large_cache_context, |ctx| {
        let chunks = ctx.fixture().source.ids().len();
        assert!(chunks <= ctx.cache().config().get_max_chunks());

        let num_threads = 4;
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut handles = vec![];
        for _ in 0..num_threads {
            let ctx = ctx.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                ctx.query(QueryParams::new())?.count()
            }));
        }
        for handle in handles {
            let count = handle.join().expect("query thread panicked")?;
            assert_eq!(count as usize, ctx.fixture().points.len());
        }

        assert_eq!(ctx.fixture().source.reads(), chunks);
        assert_eq!(ctx.cache().stats().fetches as usize, chunks);
        Ok(())
    })
}

#[test]
fn test_small_cache_evicts_and_refetches() {
    run_test(
        || create_sized_context(2000, CacheConfig::new().max_chunks(16).max_chunks_per_query(4)),
        |ctx| {
            let chunks = ctx.fixture().source.ids().len();
            assert!(chunks > 16, "fixture too small to force eviction");

            let options = QueryOptions::new().fetches_per_iteration(4);
            let first = ctx.rows(QueryParams::new().options(options))?;
            let second = ctx.rows(QueryParams::new().options(options))?;
            assert_eq!(first, second);
            assert_eq!(first, ctx.expected(|_| true));

            let stats = ctx.cache().stats();
            assert!(stats.evictions > 0);
            assert!(stats.inactive <= 16);
            assert_eq!(stats.active, 0);
            assert!(ctx.fixture().source.reads() > chunks);
            Ok(())
        },
    )
}

#[test]
fn test_batch_over_query_limit() {
    run_test(
        || create_sized_context(2000, CacheConfig::new().max_chunks_per_query(4)),
        |ctx| {
            let options = QueryOptions::new().fetches_per_iteration(5);
            let mut query = ctx.query(QueryParams::new().options(options))?;
            let mut bytes = Vec::new();

            let err = loop {
                match query.next(&mut bytes) {
                    Ok(true) => continue,
                    Ok(false) => panic!("query completed despite oversized batches"),
                    Err(err) => break err,
                }
            };
            assert!(matches!(
                err,
                CloudError::QueryLimitExceeded {
                    requested: 5,
                    limit: 4
                }
            ));
            assert_eq!(ctx.cache().stats().active, 0);

            // The rejected batch is not retried and the query cannot go on.
            assert!(query.done());
            assert_eq!(query.pending_fetches(), 0);
            assert!(matches!(
                query.next(&mut bytes),
                Err(CloudError::QueryCompleted)
            ));
            assert_eq!(ctx.fixture().source.reads(), 0);
            Ok(())
        },
    )
}

#[test]
fn test_dropping_query_releases_chunks() {
    run_test(create_test_context, |ctx| {
        let options = QueryOptions::new()
            .fetches_per_iteration(3)
            .min_bytes_per_iteration(0);
        let mut query = ctx.query(QueryParams::new().options(options))?;
        let mut bytes = Vec::new();
        while ctx.cache().stats().active == 0 {
            assert!(query.next(&mut bytes)?);
        }
        assert!(ctx.cache().stats().active <= 3);

        drop(query);
        let stats = ctx.cache().stats();
        assert_eq!(stats.active, 0);
        assert!(stats.inactive > 0);
        Ok(())
    })
}

#[test]
fn test_queries_over_different_indexes_do_not_collide() {
    let a = random_builder(800, 1).unwrap().path("a").build().unwrap();
    let b = random_builder(800, 2).unwrap().path("b").build().unwrap();
    let cache = BoundedCache::new(CacheConfig::new());
    let a = TestContext::new(a, cache.clone());
    let b = TestContext::new(b, cache);

    for ctx in [&a, &b] {
        let rows = ctx.rows(QueryParams::new()).unwrap();
        assert_eq!(rows, ctx.expected(|_| true));
    }

    let shared = a.cache();
    let again = Query::new(b.reader(), shared, QueryParams::new())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(sorted_rows(&again, b.point_size()), b.expected(|_| true));
}
