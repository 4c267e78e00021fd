use std::sync::Arc;

use async_trait::async_trait;
use feedpush_core::{
    utils::now_millis, Bytes, FeedId, FeedRecord, FeedSource, PushError, PushResult, SourceReport,
};
use futures::future::join_all;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, trace, warn, Instrument};

use super::{LatestReports, SourceConf};

/// Malformed relay answers
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The relay answered for another feed
    #[error("Asked for feed {requested}, got {received}")]
    FeedMismatch {
        /// Feed asked for
        requested: FeedId,
        /// Feed in the answer
        received: FeedId,
    },
    /// A field could not be decoded
    #[error("Invalid {field} {value:?} in report")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Raw value
        value: String,
    },
}

/// A report as served by the relay.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestReportResponse {
    feed_id: FeedId,
    /// 8 decimal fixed point value as a decimal string
    price: String,
    /// Unix seconds
    observations_timestamp: u64,
    /// Hex encoded signed report
    full_report: String,
}

impl LatestReportResponse {
    fn into_report(self, requested: &FeedId, received_at_ms: u64) -> PushResult<SourceReport> {
        if self.feed_id != *requested {
            return Err(PushError::upstream(SourceError::FeedMismatch {
                requested: *requested,
                received: self.feed_id,
            }));
        }
        let value = self.price.trim().parse::<i128>().map_err(|_| {
            PushError::upstream(SourceError::InvalidField {
                field: "price",
                value: self.price.clone(),
            })
        })?;
        let payload = self.full_report.parse::<Bytes>().map_err(|_| {
            PushError::upstream(SourceError::InvalidField {
                field: "fullReport",
                value: self.full_report.clone(),
            })
        })?;
        let record = FeedRecord::new(
            self.feed_id,
            value,
            self.observations_timestamp.saturating_mul(1_000),
            received_at_ms,
        );
        Ok(SourceReport::new(record, payload))
    }
}

/// Client of the REST relay serving the latest signed report per feed.
#[derive(Debug, Clone)]
pub struct RestSource {
    client: reqwest::Client,
    conf: SourceConf,
}

impl RestSource {
    /// Client for the relay described by `conf`.
    pub fn new(conf: SourceConf) -> PushResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(conf.request_timeout)
            .build()
            .map_err(PushError::upstream)?;
        Ok(Self { client, conf })
    }

    /// Latest report of `feed`; `None` if the relay has none.
    pub async fn fetch(&self, feed: &FeedId) -> PushResult<Option<SourceReport>> {
        let mut url = self
            .conf
            .base_url
            .join("reports/latest")
            .map_err(|err| PushError::Config(format!("source.base_url: {err}")))?;
        url.query_pairs_mut()
            .append_pair("feedID", &feed.to_string());

        let mut request = self.client.get(url);
        if let Some(key) = &self.conf.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(PushError::upstream)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: LatestReportResponse = response
            .error_for_status()
            .map_err(PushError::upstream)?
            .json()
            .await
            .map_err(PushError::upstream)?;
        body.into_report(feed, now_millis()).map(Some)
    }

    /// Poll every feed in `feeds` each poll interval, storing what comes back
    /// in `store`. Runs until the task is aborted.
    pub fn spawn_poller(
        self: Arc<Self>,
        feeds: Vec<FeedId>,
        store: Arc<LatestReports>,
    ) -> JoinHandle<()> {
        let span = info_span!("RestSource", feeds = feeds.len());
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(self.conf.poll_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    self.poll_once(&feeds, &store).await;
                }
            }
            .instrument(span),
        )
    }

    /// Fetch every feed once, concurrently. Returns how many reports were new.
    pub async fn poll_once(&self, feeds: &[FeedId], store: &LatestReports) -> usize {
        let results = join_all(feeds.iter().map(|feed| self.fetch(feed))).await;
        let mut updated = 0;
        for (feed, result) in feeds.iter().zip(results) {
            match result {
                Ok(Some(report)) => {
                    if store.update(report) {
                        updated += 1;
                    }
                }
                Ok(None) => trace!(%feed, "No report available yet"),
                Err(err) => warn!(%feed, ?err, "Failed to fetch latest report"),
            }
        }
        debug!(updated, "Polled price source");
        updated
    }
}

#[async_trait]
impl FeedSource for RestSource {
    async fn latest_report(&self, feed: &FeedId) -> PushResult<Option<SourceReport>> {
        self.fetch(feed).await
    }
}
