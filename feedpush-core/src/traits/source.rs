use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;

use crate::{FeedId, PushResult, SourceReport};

/// The upstream price source.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait FeedSource: Send + Sync + Debug {
    /// Most recent signed report of `feed`, `None` if nothing was received
    /// for it yet.
    async fn latest_report(&self, feed: &FeedId) -> PushResult<Option<SourceReport>>;
}
