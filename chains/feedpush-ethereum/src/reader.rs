use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{Token, Tokenizable};
use ethers::contract::{Multicall, MulticallVersion};
use ethers::providers::Middleware;
use ethers::types::I256;
use feedpush_core::{
    utils::now_millis, Address, FeedId, FeedReader, FeedRecord, PushError, PushResult,
};
use tracing::{debug, instrument, trace};

use crate::{contracts::FeedUpdater, EthereumError};

const ALLOW_BATCH_FAILURES: bool = true;

/// Reads the latest stored record of many feeds with a single `aggregate3`
/// call through a Multicall3 deployment.
pub struct EthereumFeedReader<M>
where
    M: Middleware,
{
    contract: FeedUpdater<M>,
    multicall: Multicall<M>,
}

impl<M> EthereumFeedReader<M>
where
    M: Middleware + 'static,
{
    /// Reader of the feed store at `target`, batching through the multicall
    /// contract at `multicall_address`.
    pub async fn new(
        provider: Arc<M>,
        target: Address,
        multicall_address: Address,
    ) -> PushResult<Self> {
        let multicall = Multicall::new(provider.clone(), Some(multicall_address))
            .await
            .map_err(PushError::rpc)?
            .version(MulticallVersion::Multicall3);
        Ok(Self {
            contract: FeedUpdater::new(target, provider),
            multicall,
        })
    }

    /// Address of the feed store
    pub fn target(&self) -> Address {
        self.contract.address()
    }
}

impl<M> std::fmt::Debug for EthereumFeedReader<M>
where
    M: Middleware,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthereumFeedReader")
            .field("target", &self.contract.address())
            .finish()
    }
}

/// Decode one `latestUpdate` answer. `None` for feeds never written.
fn decode_record(feed: FeedId, token: Token, observed_at_ms: u64) -> PushResult<Option<FeedRecord>> {
    let (price, timestamp) = <(I256, u32)>::from_token(token).map_err(|err| {
        EthereumError::MalformedResult {
            feed,
            reason: err.to_string(),
        }
    })?;
    if timestamp == 0 {
        return Ok(None);
    }
    let value = i128::try_from(price).map_err(|_| EthereumError::ValueOutOfRange(feed))?;
    Ok(Some(FeedRecord::new(
        feed,
        value,
        u64::from(timestamp) * 1_000,
        observed_at_ms,
    )))
}

#[async_trait]
impl<M> FeedReader for EthereumFeedReader<M>
where
    M: Middleware + 'static,
{
    #[instrument(level = "debug", err, skip(self, feeds), fields(target = ?self.target(), feeds = feeds.len()))]
    async fn read_records(&self, feeds: &[FeedId]) -> PushResult<Vec<FeedRecord>> {
        if feeds.is_empty() {
            return Ok(vec![]);
        }
        let mut multicall = self.multicall.clone();
        multicall.clear_calls();
        for feed in feeds {
            multicall.add_call(self.contract.latest_update(feed.0.into()), ALLOW_BATCH_FAILURES);
        }

        let results = multicall.call_raw().await.map_err(PushError::rpc)?;
        let observed_at_ms = now_millis();

        let mut records = Vec::with_capacity(feeds.len());
        for (feed, result) in feeds.iter().zip(results) {
            match result {
                Ok(token) => match decode_record(*feed, token, observed_at_ms)? {
                    Some(record) => records.push(record),
                    None => trace!(%feed, "Feed was never written"),
                },
                // the store reverts for unknown feeds
                Err(revert) => debug!(%feed, revert = %revert, "Feed read reverted"),
            }
        }
        Ok(records)
    }
}
