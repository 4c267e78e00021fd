use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{FeeConfig, FeeMultipliers, PushError, PushResult};

/// Rank of a worker among its redundant peers. Tier 1 is the primary; every
/// higher tier only acts as a fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct WorkerTier(NonZeroU32);

impl WorkerTier {
    /// The primary worker
    pub const PRIMARY: WorkerTier = WorkerTier(NonZeroU32::MIN);

    /// Tier from a 1-based worker index.
    pub fn new(index: u32) -> PushResult<Self> {
        NonZeroU32::new(index)
            .map(Self)
            .ok_or_else(|| PushError::Config("worker index must be 1 or greater".into()))
    }

    /// 1-based index
    pub fn index(&self) -> u32 {
        self.0.get()
    }

    /// Whether this is tier 1
    pub fn is_primary(&self) -> bool {
        *self == Self::PRIMARY
    }

    /// Number of tiers ahead of this one
    pub fn predecessors(&self) -> u32 {
        self.index() - 1
    }
}

impl TryFrom<u32> for WorkerTier {
    type Error = PushError;

    fn try_from(index: u32) -> Result<Self, Self::Error> {
        Self::new(index)
    }
}

impl From<WorkerTier> for u32 {
    fn from(tier: WorkerTier) -> Self {
        tier.index()
    }
}

impl Display for WorkerTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// A per-tier setting. Element `i` applies to tier `i + 1`; the last element
/// applies to every tier beyond the list. Deserializes from either a scalar or
/// a non-empty list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TieredRepr<T>", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Tiered<T>(Vec<T>);

#[derive(Deserialize)]
#[serde(untagged)]
enum TieredRepr<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> TryFrom<TieredRepr<T>> for Tiered<T> {
    type Error = PushError;

    fn try_from(repr: TieredRepr<T>) -> Result<Self, Self::Error> {
        match repr {
            TieredRepr::One(value) => Ok(Self::uniform(value)),
            TieredRepr::Many(values) => Self::new(values),
        }
    }
}

impl<T> Tiered<T> {
    /// Tiered values from a list, which must not be empty.
    pub fn new(values: Vec<T>) -> PushResult<Self> {
        if values.is_empty() {
            return Err(PushError::Config("tiered setting needs at least one value".into()));
        }
        Ok(Self(values))
    }

    /// The same value for every tier
    pub fn uniform(value: T) -> Self {
        Self(vec![value])
    }

    /// Value that applies to `tier`.
    pub fn for_tier(&self, tier: WorkerTier) -> &T {
        let idx = (tier.predecessors() as usize).min(self.0.len() - 1);
        &self.0[idx]
    }

    /// Convert every value
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Tiered<U> {
        Tiered(self.0.into_iter().map(f).collect())
    }
}

/// How worker behaviour varies with tier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierPolicy {
    /// Delay added per tier before a worker may submit
    pub stagger_interval: Duration,
    /// On-chain read cache lifetime; zero disables the cache for that tier
    pub onchain_cache_ttl: Tiered<Duration>,
    /// How often a pending transaction is polled
    pub confirmation_polling_interval: Tiered<Duration>,
    /// Blocks on top of the inclusion block required before a transaction
    /// counts as confirmed (1 = included)
    pub wait_for_confirmations: Tiered<u64>,
}

/// Everything a worker needs to know about its own tier, resolved once at
/// startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierParams {
    /// The tier these were resolved for
    pub tier: WorkerTier,
    /// Time to wait after an update first becomes due before submitting it
    pub write_delay: Duration,
    /// On-chain cache lifetime, `None` when caching is disabled
    pub cache_ttl: Option<Duration>,
    /// Confirmation polling cadence
    pub confirmation_polling_interval: Duration,
    /// Required confirmations
    pub wait_for_confirmations: u64,
    /// Fee multipliers
    pub fee_multipliers: FeeMultipliers,
}

impl TierPolicy {
    /// Resolve the parameters of `tier`.
    pub fn params(&self, tier: WorkerTier, fees: &FeeConfig) -> PushResult<TierParams> {
        let cache_ttl = *self.onchain_cache_ttl.for_tier(tier);
        Ok(TierParams {
            tier,
            write_delay: self.stagger_interval * tier.predecessors(),
            cache_ttl: (!cache_ttl.is_zero()).then_some(cache_ttl),
            confirmation_polling_interval: *self.confirmation_polling_interval.for_tier(tier),
            wait_for_confirmations: (*self.wait_for_confirmations.for_tier(tier)).max(1),
            fee_multipliers: fees.multipliers(tier)?,
        })
    }
}
