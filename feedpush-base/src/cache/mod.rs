//! Short lived cache of the records stored on-chain.
//!
//! The cache is the only owner of its entries. Other components never touch
//! them directly: once one of our transactions lands, the transaction tracker
//! sends the affected feed ids through a [`CacheInvalidator`] and the cache
//! drops them before its next lookup.

use std::collections::HashMap;
use std::time::Duration;

use feedpush_core::{FeedId, FeedReader, FeedRecord, PushError, PushResult};
use moka::future::Cache;
use parking_lot::Mutex;
use prometheus::IntCounter;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

const MAX_CACHED_FEEDS: u64 = 1_024;

/// Hit and miss counters of a cache
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    /// Lookups answered from the cache
    pub hits: IntCounter,
    /// Lookups that needed an on-chain read
    pub misses: IntCounter,
}

/// Sends invalidations to a [`FeedStateCache`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CacheInvalidator(UnboundedSender<Vec<FeedId>>);

impl CacheInvalidator {
    /// Ask the cache to drop `feeds`. A cache that no longer exists has
    /// nothing to drop, so a closed channel is not an error.
    pub fn invalidate(&self, feeds: Vec<FeedId>) {
        if feeds.is_empty() {
            return;
        }
        if self.0.send(feeds).is_err() {
            trace!("Feed state cache is gone, nothing to invalidate");
        }
    }
}

/// Latest on-chain record per feed, kept for at most a TTL.
///
/// Built without a TTL, every lookup goes to the chain.
#[derive(Debug)]
pub struct FeedStateCache {
    name: String,
    cache: Option<Cache<FeedId, FeedRecord>>,
    invalidations: Mutex<UnboundedReceiver<Vec<FeedId>>>,
    metrics: Option<CacheMetrics>,
}

impl FeedStateCache {
    /// Create a cache named `name` whose entries live for `ttl`, along with
    /// the handle used to invalidate them.
    pub fn new(
        name: impl Into<String>,
        ttl: Option<Duration>,
        metrics: Option<CacheMetrics>,
    ) -> (Self, CacheInvalidator) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let cache = ttl.map(|ttl| {
            Cache::builder()
                .max_capacity(MAX_CACHED_FEEDS)
                .time_to_live(ttl)
                .build()
        });
        let cache = Self {
            name: name.into(),
            cache,
            invalidations: Mutex::new(receiver),
            metrics,
        };
        (cache, CacheInvalidator(sender))
    }

    /// Name of the cache
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether entries are kept at all
    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cached record of `feed`. A missing or expired entry is
    /// [`PushError::StaleCache`].
    pub async fn get(&self, feed: &FeedId) -> PushResult<FeedRecord> {
        let Some(cache) = &self.cache else {
            return Err(PushError::StaleCache(*feed));
        };
        self.apply_invalidations().await;
        cache.get(feed).await.ok_or(PushError::StaleCache(*feed))
    }

    /// Records of `feeds`, read from the chain in a single call for every
    /// feed that is not cached. Feeds never written on-chain are absent from
    /// the result.
    pub async fn get_or_read(
        &self,
        reader: &impl FeedReader,
        feeds: &[FeedId],
    ) -> PushResult<HashMap<FeedId, FeedRecord>> {
        let mut records = HashMap::with_capacity(feeds.len());
        let mut stale = vec![];
        for feed in feeds {
            match self.get(feed).await {
                Ok(record) => {
                    records.insert(*feed, record);
                }
                Err(PushError::StaleCache(id)) => stale.push(id),
                Err(err) => return Err(err),
            }
        }
        self.count(records.len() as u64, stale.len() as u64);

        if stale.is_empty() {
            return Ok(records);
        }
        let fresh = reader.read_records(&stale).await?;
        trace!(
            cache = %self.name,
            requested = stale.len(),
            received = fresh.len(),
            "Read on-chain records"
        );
        for record in fresh {
            if let Some(cache) = &self.cache {
                cache.insert(record.feed_id, record).await;
            }
            records.insert(record.feed_id, record);
        }
        Ok(records)
    }

    /// Drop the entries of `feeds` right away.
    pub async fn invalidate(&self, feeds: &[FeedId]) {
        if let Some(cache) = &self.cache {
            for feed in feeds {
                cache.invalidate(feed).await;
            }
        }
    }

    async fn apply_invalidations(&self) {
        let pending: Vec<FeedId> = {
            let mut receiver = self.invalidations.lock();
            let mut pending = vec![];
            while let Ok(feeds) = receiver.try_recv() {
                pending.extend(feeds);
            }
            pending
        };
        if !pending.is_empty() {
            debug!(cache = %self.name, feeds = ?pending, "Invalidating cache entries");
            self.invalidate(&pending).await;
        }
    }

    fn count(&self, hits: u64, misses: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.hits.inc_by(hits);
            metrics.misses.inc_by(misses);
        }
    }
}

#[cfg(test)]
mod tests;
