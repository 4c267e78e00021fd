//! The upstream price source.
//!
//! A [`RestSource`] polls the relay for the latest report of every feed and
//! stores it in [`LatestReports`], which batch workers read through the
//! [`FeedSource`] trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{bail, Context, Result};
use feedpush_core::{FeedId, FeedSource, PushResult, SourceReport};
use parking_lot::RwLock;
use serde::Deserialize;
use url::Url;

use crate::settings::FromRawConf;

pub use rest::*;

mod rest;

/// Settings of the upstream REST relay.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceConf {
    /// Base url, reports are fetched from `{base_url}/reports/latest`
    pub base_url: Url,
    /// Sent as a bearer token when set
    pub api_key: Option<String>,
    /// Interval between two polls of every feed
    pub poll_interval: Duration,
    /// Bound on a single request
    pub request_timeout: Duration,
}

impl std::fmt::Debug for SourceConf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConf")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Raw version of [`SourceConf`]
#[derive(Debug, Deserialize)]
pub struct RawSourceConf {
    base_url: String,
    api_key: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

impl FromRawConf<RawSourceConf> for SourceConf {
    fn from_raw_conf(raw: RawSourceConf) -> Result<Self> {
        // relative joins keep the last path segment only with a trailing slash
        let mut base_url = raw.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base_url = base_url
            .parse()
            .with_context(|| format!("source.base_url: invalid url {:?}", raw.base_url))?;
        if raw.poll_interval_ms == 0 {
            bail!("source.poll_interval_ms: must be positive");
        }
        Ok(Self {
            base_url,
            api_key: raw.api_key.filter(|key| !key.is_empty()),
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            request_timeout: Duration::from_millis(raw.request_timeout_ms.max(1)),
        })
    }
}

/// Latest report received per feed, shared between the poller and the
/// workers.
#[derive(Debug, Default)]
pub struct LatestReports {
    reports: RwLock<HashMap<FeedId, SourceReport>>,
}

impl LatestReports {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `report` unless an equally recent or newer one is stored
    /// already. Returns whether it was stored.
    pub fn update(&self, report: SourceReport) -> bool {
        let mut reports = self.reports.write();
        let feed = report.record.feed_id;
        match reports.get(&feed) {
            Some(current) if current.record.timestamp_ms >= report.record.timestamp_ms => false,
            _ => {
                reports.insert(feed, report);
                true
            }
        }
    }

    /// Latest stored report of `feed`
    pub fn get(&self, feed: &FeedId) -> Option<SourceReport> {
        self.reports.read().get(feed).cloned()
    }
}

#[async_trait]
impl FeedSource for LatestReports {
    async fn latest_report(&self, feed: &FeedId) -> PushResult<Option<SourceReport>> {
        Ok(self.get(feed))
    }
}

#[cfg(test)]
mod tests {
    use feedpush_core::{Bytes, FeedRecord};

    use super::*;

    fn report(ts: u64, value: i128) -> SourceReport {
        SourceReport::new(
            FeedRecord::new(FeedId::zero(), value, ts, ts + 40),
            Bytes::from(vec![1, 2, 3]),
        )
    }

    #[tokio::test]
    async fn older_reports_never_replace_newer_ones() {
        let store = LatestReports::new();
        assert!(store.update(report(2_000, 10)));
        assert!(!store.update(report(1_000, 20)));
        assert!(!store.update(report(2_000, 30)));
        assert!(store.update(report(3_000, 40)));

        let latest = store.latest_report(&FeedId::zero()).await.unwrap().unwrap();
        assert_eq!(latest.record.value, 40);
        assert_eq!(store.latest_report(&FeedId::from([1; 32])).await.unwrap(), None);
    }

    #[test]
    fn api_key_is_redacted() {
        let conf = SourceConf::from_raw_conf(RawSourceConf {
            base_url: "https://relay.example".into(),
            api_key: Some("secret".into()),
            poll_interval_ms: 500,
            request_timeout_ms: 2_000,
        })
        .unwrap();
        assert!(!format!("{conf:?}").contains("secret"));
    }
}
