use std::time::Duration;

use crate::utils::as_millis;
use crate::WorkerTier;

/// Earliest unix millis at which a worker of `tier` may submit an update that
/// became due at `tier_start_ms`: `tier_start + (tier - 1) * stagger`.
pub fn allowed_submission_time(tier: WorkerTier, tier_start_ms: u64, stagger: Duration) -> u64 {
    let delay = as_millis(stagger).saturating_mul(u64::from(tier.predecessors()));
    tier_start_ms.saturating_add(delay)
}

/// Whether a worker of `tier` may submit at `now_ms` an update that became
/// due at `tier_start_ms`. The primary never waits; every later tier waits one
/// more `stagger` than the tier before it.
pub fn gate_submission(tier: WorkerTier, now_ms: u64, tier_start_ms: u64, stagger: Duration) -> bool {
    now_ms >= allowed_submission_time(tier, tier_start_ms, stagger)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGGER: Duration = Duration::from_secs(6);

    fn tier(i: u32) -> WorkerTier {
        WorkerTier::new(i).unwrap()
    }

    #[test]
    fn primary_submits_immediately() {
        assert!(gate_submission(tier(1), 1_000, 1_000, STAGGER));
    }

    #[test]
    fn later_tiers_wait_their_turn() {
        assert!(!gate_submission(tier(2), 6_999, 1_000, STAGGER));
        assert!(gate_submission(tier(2), 7_000, 1_000, STAGGER));
        assert!(!gate_submission(tier(3), 12_999, 1_000, STAGGER));
        assert!(gate_submission(tier(3), 13_000, 1_000, STAGGER));
    }

    #[test]
    fn allowed_time_is_monotonic_in_tier() {
        for start in [0u64, 1_000, 1_700_000_000_000] {
            let times: Vec<u64> = (1..=8)
                .map(|i| allowed_submission_time(tier(i), start, STAGGER))
                .collect();
            assert!(times.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn huge_delays_saturate() {
        assert_eq!(
            allowed_submission_time(tier(u32::MAX), u64::MAX - 1, Duration::MAX),
            u64::MAX
        );
    }
}
