use serde::{Deserialize, Serialize};

use crate::{PushError, WorkerTier, U256};

/// A rational multiplier `dividend / divisor` applied to fee values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMultiplier")]
pub struct Multiplier {
    dividend: u64,
    divisor: u64,
}

#[derive(Deserialize)]
struct RawMultiplier {
    dividend: u64,
    divisor: u64,
}

impl TryFrom<RawMultiplier> for Multiplier {
    type Error = PushError;

    fn try_from(raw: RawMultiplier) -> Result<Self, Self::Error> {
        Multiplier::new(raw.dividend, raw.divisor)
    }
}

impl Multiplier {
    /// Identity multiplier
    pub const ONE: Multiplier = Multiplier {
        dividend: 1,
        divisor: 1,
    };

    /// A multiplier of `dividend / divisor`. The divisor must be non-zero.
    pub fn new(dividend: u64, divisor: u64) -> Result<Self, PushError> {
        if divisor == 0 {
            return Err(PushError::Config(format!(
                "multiplier {dividend}/{divisor} has a zero divisor"
            )));
        }
        Ok(Self { dividend, divisor })
    }

    /// Numerator
    pub fn dividend(&self) -> u64 {
        self.dividend
    }

    /// Denominator
    pub fn divisor(&self) -> u64 {
        self.divisor
    }

    /// `value * dividend / divisor`, rounding down and saturating.
    pub fn apply(&self, value: U256) -> U256 {
        value.saturating_mul(U256::from(self.dividend)) / U256::from(self.divisor)
    }

    /// Multiplier as a float, for logs and metrics only.
    pub fn as_f64(&self) -> f64 {
        self.dividend as f64 / self.divisor as f64
    }
}

/// A multiplier whose dividend grows by a fixed step for every tier after the
/// primary: `(dividend + step * (tier - 1)) / divisor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SteppedMultiplier {
    /// Dividend for the primary tier
    pub dividend: u64,
    /// Common divisor
    pub divisor: u64,
    /// Added to the dividend per tier above the primary
    #[serde(default)]
    pub dividend_step: u64,
}

impl SteppedMultiplier {
    /// Same multiplier for every tier
    pub fn flat(multiplier: Multiplier) -> Self {
        Self {
            dividend: multiplier.dividend,
            divisor: multiplier.divisor,
            dividend_step: 0,
        }
    }

    /// Resolve the multiplier of `tier`.
    pub fn for_tier(&self, tier: WorkerTier) -> Result<Multiplier, PushError> {
        let steps = u64::from(tier.index() - 1);
        let dividend = self
            .dividend
            .saturating_add(self.dividend_step.saturating_mul(steps));
        Multiplier::new(dividend, self.divisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_rounds_down_and_saturates() {
        let m = Multiplier::new(125, 100).unwrap();
        assert_eq!(m.apply(U256::from(1_000u64)), U256::from(1_250u64));
        assert_eq!(m.apply(U256::from(3u64)), U256::from(3u64));
        assert_eq!(m.apply(U256::MAX), U256::MAX / U256::from(100u64));
        assert_eq!(Multiplier::ONE.apply(U256::from(7u64)), U256::from(7u64));
    }

    #[test]
    fn zero_divisor_is_rejected() {
        assert!(Multiplier::new(1, 0).is_err());
        assert!(serde_json::from_str::<Multiplier>(r#"{"dividend": 1, "divisor": 0}"#).is_err());
    }

    #[test]
    fn stepped_multiplier_grows_per_tier() {
        let stepped = SteppedMultiplier {
            dividend: 150,
            divisor: 100,
            dividend_step: 50,
        };
        let dividends: Vec<u64> = (1..=4)
            .map(|i| stepped.for_tier(WorkerTier::new(i).unwrap()).unwrap().dividend())
            .collect();
        assert_eq!(dividends, vec![150, 200, 250, 300]);
    }
}
