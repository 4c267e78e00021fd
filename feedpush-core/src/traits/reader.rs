use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{FeedId, FeedRecord, PushResult};

/// Read access to the records currently stored on-chain.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait FeedReader: Send + Sync + Debug {
    /// Latest on-chain record of every feed in `feeds`, in one round trip
    /// where the chain allows it.
    ///
    /// Feeds that were never written are left out of the result.
    async fn read_records(&self, feeds: &[FeedId]) -> PushResult<Vec<FeedRecord>>;
}
