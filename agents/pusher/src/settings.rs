//! Pusher configuration.
//!
//! On top of the shared settings, a pusher reads the upstream `source` and
//! the `batches` of feeds it keeps up to date. Feed durations are given in
//! seconds, thresholds in hundred-millionths of relative change
//! (`10000` is one basis point).

use std::collections::HashSet;
use std::time::Duration;

use derive_more::{AsRef, Deref};
use eyre::{bail, eyre, Context, Result};
use feedpush_base::{
    impl_loadable_from_settings,
    settings::{FromRawConf, RawSettings, Settings},
    source::{RawSourceConf, SourceConf},
};
use feedpush_core::{Address, BatchConfig, Feed, FeedId};
use feedpush_ethereum::PERFORM_UPKEEP_SELECTOR;
use serde::Deserialize;
use serde_json::Value;

/// Bit of a batch's `flags` marking it active.
const ACTIVE_FLAG: u32 = 1;

/// Settings for `Pusher`
#[derive(Debug, AsRef, Deref)]
pub struct PusherSettings {
    #[as_ref]
    #[deref]
    base: Settings,

    /// Upstream report relay
    pub source: SourceConf,
    /// Feed batches, inactive ones included
    pub batches: Vec<BatchConfig>,
}

impl PusherSettings {
    /// Batches that are polled
    pub fn active_batches(&self) -> impl Iterator<Item = &BatchConfig> {
        self.batches.iter().filter(|b| b.active)
    }
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct RawPusherSettings(Value);

impl_loadable_from_settings!(RawPusherSettings => PusherSettings);

#[derive(Debug, Deserialize)]
struct RawBatchConf {
    id: String,
    target: String,
    selector: Option<String>,
    #[serde(default = "default_flags")]
    flags: u32,
    active: Option<bool>,
    #[serde(default = "default_min_batch_size")]
    min_batch_size: usize,
    #[serde(default = "default_max_batch_size")]
    max_batch_size: usize,
    feeds: Vec<RawFeedConf>,
}

fn default_flags() -> u32 {
    ACTIVE_FLAG
}

fn default_min_batch_size() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize)]
struct RawFeedConf {
    feed_id: String,
    desc: String,
    heartbeat: u64,
    update_threshold: u64,
    early_heartbeat: Option<u64>,
    early_update_time: Option<u64>,
    early_update_threshold: Option<u64>,
}

impl FromRawConf<RawFeedConf> for Feed {
    fn from_raw_conf(raw: RawFeedConf) -> Result<Self> {
        let id: FeedId = raw.feed_id.parse()?;
        let heartbeat = Duration::from_secs(raw.heartbeat);
        let early_update = match (
            raw.early_heartbeat,
            raw.early_update_time,
            raw.early_update_threshold,
        ) {
            (None, None, _) => None,
            (Some(_), Some(_), _) => {
                bail!("early_heartbeat and early_update_time are mutually exclusive")
            }
            (_, _, None) => {
                bail!("early_update_threshold is required with an early update window")
            }
            (Some(age), None, Some(threshold)) => Some(Feed::early_from_heartbeat(
                Duration::from_secs(age),
                threshold,
            )),
            (None, Some(lead_time), Some(threshold)) => Some(Feed::early_from_lead_time(
                heartbeat,
                Duration::from_secs(lead_time),
                threshold,
            )),
        };
        Ok(Feed::new(
            id,
            raw.desc,
            heartbeat,
            raw.update_threshold,
            early_update,
        )?)
    }
}

fn parse_selector(raw: Option<&str>) -> Result<[u8; 4]> {
    let Some(raw) = raw else {
        return Ok(PERFORM_UPKEEP_SELECTOR);
    };
    let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
        .with_context(|| format!("invalid selector {raw:?}"))?;
    bytes
        .try_into()
        .map_err(|_| eyre!("selector {raw:?} is not 4 bytes"))
}

impl FromRawConf<RawBatchConf> for BatchConfig {
    fn from_raw_conf(raw: RawBatchConf) -> Result<Self> {
        let target: Address = raw
            .target
            .parse()
            .with_context(|| format!("target: invalid address {:?}", raw.target))?;
        let selector = parse_selector(raw.selector.as_deref()).context("selector")?;
        if raw.max_batch_size == 0 {
            bail!("max_batch_size: must be positive");
        }
        if raw.min_batch_size > raw.max_batch_size {
            bail!(
                "min_batch_size: {} exceeds max_batch_size {}",
                raw.min_batch_size,
                raw.max_batch_size
            );
        }
        if raw.feeds.is_empty() {
            bail!("feeds: a batch needs at least one feed");
        }

        let mut seen = HashSet::new();
        let mut feeds = Vec::with_capacity(raw.feeds.len());
        for (i, raw_feed) in raw.feeds.into_iter().enumerate() {
            let feed = Feed::from_raw_conf(raw_feed).with_context(|| format!("feeds[{i}]"))?;
            if !seen.insert(feed.id) {
                bail!("feeds[{i}]: feed {} is listed twice", feed.id);
            }
            feeds.push(feed);
        }

        Ok(BatchConfig {
            id: raw.id,
            target,
            selector,
            min_batch_size: raw.min_batch_size.max(1),
            max_batch_size: raw.max_batch_size,
            active: raw.active.unwrap_or(raw.flags & ACTIVE_FLAG != 0),
            feeds,
        })
    }
}

fn parse_key<T: serde::de::DeserializeOwned>(raw: &Value, key: &str) -> Result<T> {
    let value = raw
        .get(key)
        .cloned()
        .ok_or_else(|| eyre!("{key}: missing"))?;
    serde_json::from_value(value).with_context(|| format!("{key}: invalid"))
}

impl FromRawConf<RawPusherSettings> for PusherSettings {
    fn from_raw_conf(raw: RawPusherSettings) -> Result<Self> {
        let base: RawSettings =
            serde_json::from_value(raw.0.clone()).context("Expected valid base agent settings")?;
        let base = Settings::from_raw_conf(base)?;

        let source: RawSourceConf = parse_key(&raw.0, "source")?;
        let source = SourceConf::from_raw_conf(source)?;

        let raw_batches: Vec<RawBatchConf> = parse_key(&raw.0, "batches")?;
        let mut ids = HashSet::new();
        let mut batches = Vec::with_capacity(raw_batches.len());
        for (i, raw_batch) in raw_batches.into_iter().enumerate() {
            let batch = BatchConfig::from_raw_conf(raw_batch)
                .with_context(|| format!("batches[{i}]"))?;
            if !ids.insert(batch.id.clone()) {
                bail!("batches[{i}].id: duplicate batch id {:?}", batch.id);
            }
            batches.push(batch);
        }
        if !batches.iter().any(|b| b.active) {
            bail!("batches: no active batch configured");
        }

        Ok(Self {
            base,
            source,
            batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use feedpush_core::ONE_BASIS_POINT;
    use serde_json::json;

    use super::*;

    const ETH_USD: &str = "0x000362205e10b3a147d02792eccee483dca6c7b44ecce7012cb8c6e0b68b3ae9";
    const BTC_USD: &str = "0x00039d9e45394f473ab1f050a1b963e6b05351e52d71e507509ada0c95ed75b8";

    fn feed(id: &str) -> Value {
        json!({
            "feed_id": id,
            "desc": "ETH/USD",
            "heartbeat": 60,
            "update_threshold": 10000,
            "early_heartbeat": 52,
            "early_update_threshold": 8000
        })
    }

    fn raw(batches: Value) -> RawPusherSettings {
        RawPusherSettings(json!({
            "worker_index": 2,
            "polling_interval_ms": 100,
            "chain": {
                "name": "worldchain",
                "chain_id": 480,
                "rpc_url": "http://localhost:8545",
                "signer_key": "11".repeat(32)
            },
            "tx": {
                "transaction_timeout_ms": 12000,
                "confirmation_timeout_ms": 6000,
                "gas_limit": 1000000,
                "tx_type": 0,
                "gas_price_multiplier": { "dividend": 200, "divisor": 100, "dividend_step": 50 }
            },
            "tiers": {
                "stagger_interval_ms": 6000,
                "onchain_cache_ttl_ms": 500,
                "confirmation_polling_interval_ms": [500, 1000]
            },
            "source": { "base_url": "https://relay.example/v1" },
            "batches": batches
        }))
    }

    #[test]
    fn parses_batches() {
        let settings = PusherSettings::from_raw_conf(raw(json!([{
            "id": "main",
            "target": "0xe92ea17a074643326c8B5F11f579997eABfcD428",
            "selector": "0x4585e33b",
            "flags": 1,
            "min_batch_size": 1,
            "max_batch_size": 100,
            "feeds": [feed(ETH_USD), feed(BTC_USD)]
        }])))
        .unwrap();

        assert_eq!(settings.worker_tier.index(), 2);
        assert_eq!(settings.source.base_url.as_str(), "https://relay.example/v1/");
        let batch = &settings.batches[0];
        assert!(batch.active);
        assert_eq!(batch.selector, PERFORM_UPKEEP_SELECTOR);
        assert_eq!(batch.feeds.len(), 2);
        let eth = &batch.feeds[0];
        assert_eq!(eth.update_threshold, ONE_BASIS_POINT);
        assert_eq!(eth.early_window(), Duration::from_secs(8));
        assert_eq!(settings.active_batches().count(), 1);
    }

    #[test]
    fn parses_the_worldchain_example() {
        let mut raw: Value =
            serde_json::from_str(include_str!("../../../config/worldchain.example.json")).unwrap();
        raw["chain"]["signer_key"] = json!(format!("0x{}", "11".repeat(32)));

        let settings = PusherSettings::from_raw_conf(RawPusherSettings(raw)).unwrap();

        let batch = settings.active_batches().next().unwrap();
        assert_eq!(batch.feeds.len(), 11);
        assert_eq!(batch.selector, PERFORM_UPKEEP_SELECTOR);
        assert!(batch
            .feeds
            .iter()
            .all(|feed| feed.early_window() == Duration::from_secs(8)));
        assert_eq!(settings.tiers.stagger_interval, Duration::from_secs(6));
        assert_eq!(settings.tx.transaction_timeout, Duration::from_secs(12));
        assert!(settings.tx.op_gas_price_oracle.is_some());
    }

    #[test]
    fn lead_time_and_absolute_early_windows_agree() {
        let mut lead = feed(ETH_USD);
        lead["early_heartbeat"] = Value::Null;
        lead["early_update_time"] = json!(8);
        let lead: RawFeedConf = serde_json::from_value(lead).unwrap();
        let absolute: RawFeedConf = serde_json::from_value(feed(ETH_USD)).unwrap();
        assert_eq!(
            Feed::from_raw_conf(lead).unwrap(),
            Feed::from_raw_conf(absolute).unwrap()
        );
    }

    #[test]
    fn rejects_invalid_feeds() {
        let mut both = feed(ETH_USD);
        both["early_update_time"] = json!(8);
        let both: RawFeedConf = serde_json::from_value(both).unwrap();
        assert!(Feed::from_raw_conf(both).is_err());

        let mut loose = feed(ETH_USD);
        loose["early_update_threshold"] = json!(20000);
        let loose: RawFeedConf = serde_json::from_value(loose).unwrap();
        assert!(Feed::from_raw_conf(loose).is_err());
    }

    #[test]
    fn rejects_invalid_batches() {
        let duplicate_feed = raw(json!([{
            "id": "main",
            "target": "0xe92ea17a074643326c8B5F11f579997eABfcD428",
            "feeds": [feed(ETH_USD), feed(ETH_USD)]
        }]));
        let err = PusherSettings::from_raw_conf(duplicate_feed).unwrap_err();
        assert!(format!("{err:#}").contains("batches[0]"));

        let only_inactive = raw(json!([{
            "id": "main",
            "target": "0xe92ea17a074643326c8B5F11f579997eABfcD428",
            "flags": 0,
            "feeds": [feed(ETH_USD)]
        }]));
        assert!(PusherSettings::from_raw_conf(only_inactive).is_err());

        let bad_bounds = raw(json!([{
            "id": "main",
            "target": "0xe92ea17a074643326c8B5F11f579997eABfcD428",
            "min_batch_size": 5,
            "max_batch_size": 2,
            "feeds": [feed(ETH_USD)]
        }]));
        assert!(PusherSettings::from_raw_conf(bad_bounds).is_err());
    }
}
