use std::time::Duration;

use async_trait::async_trait;
use feedpush_core::{FeedId, FeedReader, FeedRecord, PushError, PushResult};
use mockall::predicate::eq;
use prometheus::IntCounter;

use super::*;

mockall::mock! {
    pub Reader {}

    #[async_trait]
    impl FeedReader for Reader {
        async fn read_records(&self, feeds: &[FeedId]) -> PushResult<Vec<FeedRecord>>;
    }
}

impl std::fmt::Debug for MockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockReader").finish()
    }
}

fn id(i: u8) -> FeedId {
    FeedId::from([i; 32])
}

fn record(i: u8, ts: u64) -> FeedRecord {
    FeedRecord::new(id(i), i128::from(i) * 100, ts, ts)
}

fn metrics() -> CacheMetrics {
    CacheMetrics {
        hits: IntCounter::new("hits", "hits").unwrap(),
        misses: IntCounter::new("misses", "misses").unwrap(),
    }
}

#[tokio::test]
async fn second_lookup_is_served_from_cache() {
    let mut reader = MockReader::new();
    reader
        .expect_read_records()
        .with(eq(vec![id(1), id(2)]))
        .times(1)
        .returning(|_| Ok(vec![record(1, 10), record(2, 20)]));

    let metrics = metrics();
    let (cache, _invalidator) =
        FeedStateCache::new("test", Some(Duration::from_secs(60)), Some(metrics.clone()));
    let first = cache.get_or_read(&reader, &[id(1), id(2)]).await.unwrap();
    let second = cache.get_or_read(&reader, &[id(1), id(2)]).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second[&id(2)].timestamp_ms, 20);
    assert_eq!(metrics.misses.get(), 2);
    assert_eq!(metrics.hits.get(), 2);
}

#[tokio::test]
async fn only_misses_are_read() {
    let mut reader = MockReader::new();
    reader
        .expect_read_records()
        .with(eq(vec![id(1)]))
        .times(1)
        .returning(|_| Ok(vec![record(1, 10)]));
    reader
        .expect_read_records()
        .with(eq(vec![id(2)]))
        .times(1)
        .returning(|_| Ok(vec![record(2, 20)]));

    let (cache, _invalidator) = FeedStateCache::new("test", Some(Duration::from_secs(60)), None);
    cache.get_or_read(&reader, &[id(1)]).await.unwrap();
    let records = cache.get_or_read(&reader, &[id(1), id(2)]).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn invalidation_forces_a_fresh_read() {
    let mut reader = MockReader::new();
    let mut reads = 0;
    reader.expect_read_records().times(2).returning(move |_| {
        reads += 1;
        Ok(vec![record(1, reads)])
    });

    let (cache, invalidator) = FeedStateCache::new("test", Some(Duration::from_secs(60)), None);
    assert_eq!(
        cache.get_or_read(&reader, &[id(1)]).await.unwrap()[&id(1)].timestamp_ms,
        1
    );
    invalidator.invalidate(vec![id(1)]);
    assert_eq!(
        cache.get_or_read(&reader, &[id(1)]).await.unwrap()[&id(1)].timestamp_ms,
        2
    );
}

#[tokio::test]
async fn disabled_cache_always_reads() {
    let mut reader = MockReader::new();
    reader
        .expect_read_records()
        .times(3)
        .returning(|_| Ok(vec![record(1, 10)]));

    let (cache, _invalidator) = FeedStateCache::new("test", None, None);
    assert!(!cache.is_enabled());
    for _ in 0..3 {
        cache.get_or_read(&reader, &[id(1)]).await.unwrap();
    }
    assert!(matches!(cache.get(&id(1)).await, Err(PushError::StaleCache(_))));
}

#[tokio::test]
async fn unwritten_feeds_are_absent_and_not_cached() {
    let mut reader = MockReader::new();
    reader
        .expect_read_records()
        .times(2)
        .returning(|_| Ok(vec![]));

    let (cache, _invalidator) = FeedStateCache::new("test", Some(Duration::from_secs(60)), None);
    assert!(cache.get_or_read(&reader, &[id(7)]).await.unwrap().is_empty());
    assert!(cache.get_or_read(&reader, &[id(7)]).await.unwrap().is_empty());
}

#[tokio::test]
async fn rpc_errors_propagate() {
    let mut reader = MockReader::new();
    reader.expect_read_records().returning(|_| {
        Err(PushError::rpc(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        )))
    });

    let (cache, _invalidator) = FeedStateCache::new("test", Some(Duration::from_secs(60)), None);
    assert!(matches!(
        cache.get_or_read(&reader, &[id(1)]).await,
        Err(PushError::RpcUnavailable(_))
    ));
}

#[tokio::test]
#[tracing_test::traced_test]
async fn pending_invalidations_are_applied_on_the_next_lookup() {
    let mut reader = MockReader::new();
    reader
        .expect_read_records()
        .times(2)
        .returning(|_| Ok(vec![record(1, 10)]));

    let (cache, invalidator) = FeedStateCache::new("test", Some(Duration::from_secs(60)), None);
    cache.get_or_read(&reader, &[id(1)]).await.unwrap();

    invalidator.invalidate(vec![id(1)]);
    assert!(!logs_contain("Invalidating cache entries"));

    cache.get_or_read(&reader, &[id(1)]).await.unwrap();
    assert!(logs_contain("Invalidating cache entries"));
}
