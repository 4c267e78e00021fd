use std::time::Duration;

use eyre::{bail, Context, Result};
use feedpush_core::{ClockSkewConfig, TierParams, TierPolicy, Tiered, WorkerTier};
use serde::Deserialize;

use super::{
    ChainConf, FromRawConf, RawChainConf, RawTransactionConf, TracingConfig, TransactionConf,
};
use crate::CoreMetrics;

/// Settings every feedpush agent shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Rank of this worker among its redundant peers
    pub worker_tier: WorkerTier,
    /// Deployment name, e.g. `worldchain-a`
    pub instance: String,
    /// Port the metrics server listens on
    pub metrics_port: u16,
    /// Logging
    pub tracing: TracingConfig,
    /// Target chain
    pub chain: ChainConf,
    /// Transaction submission
    pub tx: TransactionConf,
    /// Per-tier behaviour
    pub tiers: TierPolicy,
    /// Clock skew estimation window
    pub clock_skew: ClockSkewConfig,
    /// Interval between two ticks of a worker
    pub polling_interval: Duration,
}

impl Settings {
    /// Resolve the parameters of this worker's tier.
    pub fn tier_params(&self) -> Result<TierParams> {
        Ok(self.tiers.params(self.worker_tier, &self.tx.fees)?)
    }

    /// Create the metrics registry for `agent_name`.
    pub fn metrics(&self, agent_name: &str) -> Result<CoreMetrics> {
        Ok(CoreMetrics::new(
            agent_name,
            self.worker_tier,
            self.metrics_port,
            prometheus::Registry::new(),
        )?)
    }
}

/// Raw version of [`Settings`]
#[derive(Debug, Deserialize)]
pub struct RawSettings {
    #[serde(default = "default_worker_index")]
    worker_index: u32,
    instance: Option<String>,
    #[serde(default = "default_metrics_port")]
    metrics_port: u16,
    #[serde(default)]
    tracing: TracingConfig,
    chain: RawChainConf,
    tx: RawTransactionConf,
    tiers: RawTierConf,
    clock_skew: Option<ClockSkewConfig>,
    polling_interval_ms: u64,
}

fn default_worker_index() -> u32 {
    1
}

fn default_metrics_port() -> u16 {
    9090
}

/// Raw version of [`TierPolicy`]. Durations in millis.
#[derive(Debug, Deserialize)]
pub struct RawTierConf {
    stagger_interval_ms: u64,
    onchain_cache_ttl_ms: Tiered<u64>,
    confirmation_polling_interval_ms: Tiered<u64>,
    #[serde(default = "default_confirmations")]
    wait_for_confirmations: Tiered<u64>,
}

fn default_confirmations() -> Tiered<u64> {
    Tiered::uniform(1)
}

impl FromRawConf<RawTierConf> for TierPolicy {
    fn from_raw_conf(raw: RawTierConf) -> Result<Self> {
        Ok(TierPolicy {
            stagger_interval: Duration::from_millis(raw.stagger_interval_ms),
            onchain_cache_ttl: raw.onchain_cache_ttl_ms.map(Duration::from_millis),
            confirmation_polling_interval: raw
                .confirmation_polling_interval_ms
                .map(|ms| Duration::from_millis(ms.max(1))),
            wait_for_confirmations: raw.wait_for_confirmations,
        })
    }
}

impl FromRawConf<RawSettings> for Settings {
    fn from_raw_conf(raw: RawSettings) -> Result<Self> {
        let worker_tier = WorkerTier::new(raw.worker_index).context("worker_index")?;
        let chain = ChainConf::from_raw_conf(raw.chain)?;
        let tx = TransactionConf::from_raw_conf(raw.tx)?;
        let tiers = TierPolicy::from_raw_conf(raw.tiers)?;

        let clock_skew = raw.clock_skew.unwrap_or_default();
        if clock_skew.max_records < clock_skew.min_records {
            bail!(
                "clock_skew.max_records: {} is below clock_skew.min_records {}",
                clock_skew.max_records,
                clock_skew.min_records
            );
        }
        if raw.polling_interval_ms == 0 {
            bail!("polling_interval_ms: must be positive");
        }

        let instance = raw
            .instance
            .unwrap_or_else(|| format!("{}-{}", chain.name, worker_tier));

        Ok(Self {
            worker_tier,
            instance,
            metrics_port: raw.metrics_port,
            tracing: raw.tracing,
            chain,
            tx,
            tiers,
            clock_skew,
            polling_interval: Duration::from_millis(raw.polling_interval_ms),
        })
    }
}

/// Implement [`crate::LoadableFromSettings`] for an agent settings type whose
/// raw form is `$raw`.
#[macro_export]
macro_rules! impl_loadable_from_settings {
    ($raw:ty => $settings:ty) => {
        impl $crate::LoadableFromSettings for $settings {
            fn load() -> eyre::Result<Self> {
                $crate::settings::load_settings::<$raw, $settings>()
            }
        }
    };
}
