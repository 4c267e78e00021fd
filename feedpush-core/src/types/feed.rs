use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PushError, PushResult, H256};

/// Opaque 32 byte identifier of a price feed, shared by the upstream source
/// and the on-chain contract.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub H256);

impl FeedId {
    /// The all-zero id
    pub fn zero() -> Self {
        Self(H256::zero())
    }

    /// Raw bytes of the id
    pub fn to_fixed_bytes(self) -> [u8; 32] {
        self.0.to_fixed_bytes()
    }
}

impl From<[u8; 32]> for FeedId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(H256::from(bytes))
    }
}

impl FromStr for FeedId {
    type Err = PushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)
            .map_err(|err| PushError::Config(format!("invalid feed id {s}: {err}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| PushError::Config(format!("feed id {s} is not 32 bytes")))?;
        Ok(bytes.into())
    }
}

impl Display for FeedId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0.as_bytes()))
    }
}

impl Debug for FeedId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Relaxed deviation rule that applies only close to the heartbeat deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EarlyUpdate {
    /// Age of the on-chain record at which the early window opens
    pub window_start: Duration,
    /// Deviation threshold inside the window, in hundred-millionths
    pub threshold: u64,
}

/// A feed and its update rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Feed {
    /// Feed identifier
    pub id: FeedId,
    /// Human readable label, e.g. `ETH/USD`
    pub desc: String,
    /// Maximum age of the on-chain record before an update is forced
    pub heartbeat: Duration,
    /// Minimum relative deviation that triggers an update, in hundred-millionths
    pub update_threshold: u64,
    /// Optional early update rule
    pub early_update: Option<EarlyUpdate>,
}

impl Feed {
    /// Build a feed, checking that the early update rule is actually relaxed
    /// and opens before the heartbeat.
    pub fn new(
        id: FeedId,
        desc: impl Into<String>,
        heartbeat: Duration,
        update_threshold: u64,
        early_update: Option<EarlyUpdate>,
    ) -> PushResult<Self> {
        let desc = desc.into();
        if heartbeat.is_zero() {
            return Err(PushError::Config(format!("{desc}: heartbeat must be positive")));
        }
        if let Some(early) = early_update {
            if early.threshold > update_threshold {
                return Err(PushError::Config(format!(
                    "{desc}: early update threshold {} exceeds update threshold {update_threshold}",
                    early.threshold
                )));
            }
            if early.window_start >= heartbeat {
                return Err(PushError::Config(format!(
                    "{desc}: early window opens at {:?}, not before the {heartbeat:?} heartbeat",
                    early.window_start
                )));
            }
        }
        Ok(Self {
            id,
            desc,
            heartbeat,
            update_threshold,
            early_update,
        })
    }

    /// Early rule expressed as an absolute age, e.g. `60 - 8` seconds.
    pub fn early_from_heartbeat(early_heartbeat: Duration, threshold: u64) -> EarlyUpdate {
        EarlyUpdate {
            window_start: early_heartbeat,
            threshold,
        }
    }

    /// Early rule expressed as a lead time before the heartbeat, e.g. 15
    /// seconds early.
    pub fn early_from_lead_time(
        heartbeat: Duration,
        lead_time: Duration,
        threshold: u64,
    ) -> EarlyUpdate {
        EarlyUpdate {
            window_start: heartbeat.saturating_sub(lead_time),
            threshold,
        }
    }

    /// Length of the early window preceding the heartbeat, zero if disabled.
    pub fn early_window(&self) -> Duration {
        self.early_update
            .map(|early| self.heartbeat.saturating_sub(early.window_start))
            .unwrap_or_default()
    }
}
