use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::{relative_deviation, Feed, FeedRecord};

/// Why an update is due.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateReason {
    /// The on-chain record is at least one heartbeat old
    Heartbeat,
    /// Inside the early window, the deviation met the relaxed threshold
    EarlyDeviation,
    /// The deviation met the update threshold
    Deviation,
}

impl UpdateReason {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateReason::Heartbeat => "heartbeat",
            UpdateReason::EarlyDeviation => "early-deviation",
            UpdateReason::Deviation => "deviation",
        }
    }
}

impl Display for UpdateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`check_update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateCheck {
    /// Set when an update is due
    pub reason: Option<UpdateReason>,
    /// Skew corrected age of the on-chain record
    pub age: Duration,
    /// Relative deviation of the latest record from the on-chain one, in
    /// hundred-millionths
    pub deviation: u128,
}

impl UpdateCheck {
    /// Whether an update is due
    pub fn is_due(&self) -> bool {
        self.reason.is_some()
    }
}

/// Decide whether `feed` needs an update.
///
/// `age = now - onchain.timestamp - skew`, clamped at zero. Checked in order:
/// 1. `age >= heartbeat` is due whatever the deviation.
/// 2. Inside the early window, a deviation of at least the early threshold.
/// 3. A deviation of at least the update threshold.
///
/// A missing on-chain record (never written, or not readable from the cache)
/// counts as infinitely old and infinitely deviated.
///
/// This only looks at its arguments, so workers of every tier that see the
/// same records reach the same decision.
pub fn check_update(
    feed: &Feed,
    latest: &FeedRecord,
    onchain: Option<&FeedRecord>,
    now_ms: u64,
    skew_ms: i64,
) -> UpdateCheck {
    let Some(onchain) = onchain else {
        return UpdateCheck {
            reason: Some(UpdateReason::Heartbeat),
            age: Duration::MAX,
            deviation: u128::MAX,
        };
    };

    let age_ms = i128::from(now_ms) - i128::from(onchain.timestamp_ms) - i128::from(skew_ms);
    let age = Duration::from_millis(age_ms.clamp(0, i128::from(u64::MAX)) as u64);
    let deviation = relative_deviation(latest.value, onchain.value);

    let reason = if age >= feed.heartbeat {
        Some(UpdateReason::Heartbeat)
    } else if feed
        .early_update
        .is_some_and(|early| age >= early.window_start && deviation >= u128::from(early.threshold))
    {
        Some(UpdateReason::EarlyDeviation)
    } else if deviation >= u128::from(feed.update_threshold) {
        Some(UpdateReason::Deviation)
    } else {
        None
    };

    UpdateCheck {
        reason,
        age,
        deviation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FeedId, ONE_BASIS_POINT};

    const NOW: u64 = 1_700_000_000_000;
    const PRICE: i128 = 3_000 * 100_000_000;

    fn feed(update_threshold: u64) -> Feed {
        let early = Feed::early_from_heartbeat(Duration::from_secs(52), 8_000);
        Feed::new(
            FeedId::zero(),
            "ETH/USD",
            Duration::from_secs(60),
            update_threshold,
            Some(early),
        )
        .unwrap()
    }

    fn onchain(age_secs: u64) -> FeedRecord {
        FeedRecord::new(FeedId::zero(), PRICE, NOW - age_secs * 1_000, NOW)
    }

    /// A record deviating from `PRICE` by `deviation` hundred-millionths
    fn latest(deviation: i128) -> FeedRecord {
        FeedRecord::new(FeedId::zero(), PRICE + PRICE * deviation / 100_000_000, NOW, NOW)
    }

    #[test]
    fn heartbeat_forces_an_update_without_deviation() {
        let check = check_update(&feed(ONE_BASIS_POINT), &latest(0), Some(&onchain(61)), NOW, 0);
        assert_eq!(check.reason, Some(UpdateReason::Heartbeat));
        assert_eq!(check.deviation, 0);
        assert_eq!(check.age, Duration::from_secs(61));
    }

    #[test]
    fn deviation_above_threshold_is_due() {
        let check = check_update(&feed(ONE_BASIS_POINT), &latest(15_000), Some(&onchain(10)), NOW, 0);
        assert_eq!(check.reason, Some(UpdateReason::Deviation));
        assert_eq!(check.deviation, 15_000);
    }

    #[test]
    fn early_window_uses_the_relaxed_threshold() {
        let feed = feed(ONE_BASIS_POINT);
        let check = check_update(&feed, &latest(8_500), Some(&onchain(55)), NOW, 0);
        assert_eq!(check.reason, Some(UpdateReason::EarlyDeviation));

        // same deviation before the window opens
        let check = check_update(&feed, &latest(8_500), Some(&onchain(50)), NOW, 0);
        assert_eq!(check.reason, None);
    }

    #[test]
    fn quiet_young_feed_is_not_due() {
        let check = check_update(&feed(ONE_BASIS_POINT), &latest(9_999), Some(&onchain(30)), NOW, 0);
        assert!(!check.is_due());
    }

    #[test]
    fn skew_shifts_the_age() {
        let feed = feed(ONE_BASIS_POINT);
        // local clock runs 2s ahead of the source: 61s looks like 59s
        let check = check_update(&feed, &latest(0), Some(&onchain(61)), NOW, 2_000);
        assert_eq!(check.age, Duration::from_secs(59));
        assert_eq!(check.reason, None);

        // local clock runs behind: 59s looks like 61s
        let check = check_update(&feed, &latest(0), Some(&onchain(59)), NOW, -2_000);
        assert_eq!(check.reason, Some(UpdateReason::Heartbeat));
    }

    #[test]
    fn future_timestamps_clamp_to_zero_age() {
        let future = FeedRecord::new(FeedId::zero(), PRICE, NOW + 5_000, NOW);
        let check = check_update(&feed(ONE_BASIS_POINT), &latest(0), Some(&future), NOW, 0);
        assert_eq!(check.age, Duration::ZERO);
    }

    #[test]
    fn missing_onchain_record_is_due() {
        let check = check_update(&feed(ONE_BASIS_POINT), &latest(0), None, NOW, 0);
        assert!(check.is_due());
        assert_eq!(check.deviation, u128::MAX);
    }

    #[test]
    fn zero_onchain_value_is_always_due() {
        let zero = FeedRecord::new(FeedId::zero(), 0, NOW, NOW);
        let check = check_update(&feed(ONE_BASIS_POINT), &latest(0), Some(&zero), NOW, 0);
        assert_eq!(check.reason, Some(UpdateReason::Deviation));
    }

    #[test]
    fn raising_the_threshold_never_makes_a_feed_due() {
        for deviation in [0, 5_000, 9_999, 10_000, 15_000, 1_000_000] {
            for age in [0, 10, 53, 59, 60, 75] {
                let before = check_update(&feed(10_000), &latest(deviation), Some(&onchain(age)), NOW, 0);
                let after = check_update(&feed(20_000), &latest(deviation), Some(&onchain(age)), NOW, 0);
                assert!(before.is_due() || !after.is_due(), "{deviation} at {age}s");
            }
        }
    }

    #[test]
    fn identical_inputs_give_identical_decisions() {
        let feed = feed(ONE_BASIS_POINT);
        let a = check_update(&feed, &latest(8_500), Some(&onchain(55)), NOW, 150);
        let b = check_update(&feed, &latest(8_500), Some(&onchain(55)), NOW, 150);
        assert_eq!(a, b);
    }

    #[test]
    fn reasons_print_as_labels() {
        assert_eq!(UpdateReason::EarlyDeviation.to_string(), "early-deviation");
    }
}
