use derive_new::new;

use crate::{Bytes, FeedId, U256};

/// Fixed-point scale of feed values and of relative deviations: both are
/// expressed with 8 decimals, so a deviation of `10_000` is one basis point.
pub const DEVIATION_SCALE: u64 = 100_000_000;

/// One basis point expressed in hundred-millionths.
pub const ONE_BASIS_POINT: u64 = 10_000;

/// A value of a feed at a point in time, either as observed upstream or as
/// last recorded on-chain.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedRecord {
    /// Feed this record belongs to
    pub feed_id: FeedId,
    /// Value with 8 decimals of precision
    pub value: i128,
    /// Timestamp assigned by the source of the record, in unix millis
    pub timestamp_ms: u64,
    /// Local wall clock time at which this process observed the record, in
    /// unix millis
    pub observed_at_ms: u64,
}

impl FeedRecord {
    /// Relative deviation of `self` from `previous`, see [`relative_deviation`].
    pub fn deviation_from(&self, previous: &FeedRecord) -> u128 {
        relative_deviation(self.value, previous.value)
    }
}

/// An upstream record together with the signed payload that proves it
/// on-chain.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct SourceReport {
    /// Decoded record
    pub record: FeedRecord,
    /// Opaque signed report forwarded to the contract untouched
    pub payload: Bytes,
}

/// `|new - old| / |old|` in hundred-millionths.
///
/// A zero `old` value yields `u128::MAX` so that it always meets any
/// threshold.
pub fn relative_deviation(new: i128, old: i128) -> u128 {
    if old == 0 {
        return u128::MAX;
    }
    let diff = new.abs_diff(old);
    let base = old.unsigned_abs();
    match diff.checked_mul(DEVIATION_SCALE as u128) {
        Some(scaled) => scaled / base,
        None => {
            let wide = U256::from(diff) * U256::from(DEVIATION_SCALE) / U256::from(base);
            if wide > U256::from(u128::MAX) {
                u128::MAX
            } else {
                wide.as_u128()
            }
        }
    }
}
