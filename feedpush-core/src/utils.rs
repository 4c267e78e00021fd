use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds. A clock set before the epoch reads as 0.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Nearest-rank percentile of `values`. `percentile` is clamped to 0..=100;
/// returns `None` for an empty input.
pub fn percentile<T: Ord + Copy>(values: &[T], percentile: u8) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let p = usize::from(percentile.min(100));
    let rank = (p * sorted.len()).div_ceil(100).max(1);
    sorted.get(rank - 1).copied()
}

/// Shortened hex of a byte string for log fields: `0x1234…abcd`.
pub fn short_hex(bytes: &[u8]) -> String {
    let full = hex::encode(bytes);
    if full.len() <= 12 {
        return format!("0x{full}");
    }
    format!("0x{}…{}", &full[..4], &full[full.len() - 4..])
}
