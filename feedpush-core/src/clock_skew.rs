use std::collections::VecDeque;
use std::time::Duration;

use derive_new::new;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::utils::as_millis;
use crate::{PushError, PushResult};

/// Window of samples the skew estimate is computed over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSkewConfig {
    /// Fewer usable samples than this and no estimate is produced
    pub min_records: usize,
    /// Only the most recent `max_records` samples are used
    pub max_records: usize,
    /// Samples observed longer ago than this are ignored
    #[serde(rename = "max_age_ms", with = "millis")]
    pub max_age: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(super::as_millis(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

impl Default for ClockSkewConfig {
    fn default() -> Self {
        Self {
            min_records: 3,
            max_records: 11,
            max_age: Duration::from_secs(120),
        }
    }
}

/// A record timestamp as assigned by the source, paired with the local time
/// it was received at.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockSkewSample {
    /// Local receive time, unix millis
    pub local_ms: u64,
    /// Source timestamp, unix millis
    pub source_ms: u64,
}

impl ClockSkewSample {
    /// `local - source` in millis
    pub fn skew(&self) -> i64 {
        self.local_ms as i64 - self.source_ms as i64
    }
}

/// Median of `local - source` over the recent samples, in millis.
///
/// `samples` must be ordered oldest first. Samples received more than
/// `max_age` before `now_ms` are dropped, then only the newest `max_records`
/// are kept. Fails with [`PushError::InsufficientData`] when fewer than
/// `min_records` remain; callers use an offset of zero in that case.
pub fn estimate_skew<'a>(
    samples: impl IntoIterator<Item = &'a ClockSkewSample>,
    config: &ClockSkewConfig,
    now_ms: u64,
) -> PushResult<i64> {
    let oldest_allowed = now_ms.saturating_sub(as_millis(config.max_age));
    let recent: Vec<i64> = samples
        .into_iter()
        .filter(|s| s.local_ms >= oldest_allowed)
        .map(ClockSkewSample::skew)
        .collect();
    let retained = &recent[recent.len().saturating_sub(config.max_records)..];

    if retained.len() < config.min_records.max(1) {
        return Err(PushError::InsufficientData {
            available: retained.len(),
            required: config.min_records,
        });
    }

    let mut sorted = retained.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        // the two middle values straddle the median
        ((sorted[mid - 1] as i128 + sorted[mid] as i128) / 2) as i64
    } else {
        sorted[mid]
    };
    trace!(samples = sorted.len(), median, "Estimated clock skew");
    Ok(median)
}

/// Rolling store of skew samples. Lives only in memory: a restarted worker
/// starts from scratch.
#[derive(Debug, Clone)]
pub struct ClockSkewEstimator {
    config: ClockSkewConfig,
    samples: VecDeque<ClockSkewSample>,
}

impl ClockSkewEstimator {
    /// Empty estimator
    pub fn new(config: ClockSkewConfig) -> Self {
        Self {
            config,
            samples: VecDeque::with_capacity(config.max_records),
        }
    }

    /// Add a sample, discarding the oldest ones beyond `max_records`.
    pub fn record(&mut self, sample: ClockSkewSample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.config.max_records {
            self.samples.pop_front();
        }
    }

    /// See [`estimate_skew`].
    pub fn estimate(&self, now_ms: u64) -> PushResult<i64> {
        estimate_skew(&self.samples, &self.config, now_ms)
    }

    /// The estimate, or zero when there is not enough data.
    pub fn offset_or_zero(&self, now_ms: u64) -> i64 {
        self.estimate(now_ms).unwrap_or_default()
    }

    /// Number of stored samples, including expired ones
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample was recorded yet
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
