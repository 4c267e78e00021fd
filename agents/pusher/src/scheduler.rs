use std::collections::HashMap;
use std::time::Duration;

use feedpush_core::{allowed_submission_time, gate_submission, FeedId, WorkerTier};

/// Whether a due feed may be submitted by this worker now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The tier's delay has elapsed
    Open,
    /// Earlier tiers still have this long to land their update
    Waiting(Duration),
}

/// Remembers when each feed was first seen due, and holds it back until this
/// worker's tier delay has elapsed since then.
///
/// A feed that stops being due (because an earlier tier's update landed)
/// starts over the next time it becomes due.
#[derive(Debug)]
pub struct TierScheduler {
    tier: WorkerTier,
    stagger: Duration,
    first_due: HashMap<FeedId, u64>,
}

impl TierScheduler {
    pub fn new(tier: WorkerTier, stagger: Duration) -> Self {
        Self {
            tier,
            stagger,
            first_due: HashMap::new(),
        }
    }

    /// Gate of a feed found due at `now_ms`.
    pub fn due(&mut self, feed: FeedId, now_ms: u64) -> Gate {
        let start = *self.first_due.entry(feed).or_insert(now_ms);
        if gate_submission(self.tier, now_ms, start, self.stagger) {
            Gate::Open
        } else {
            let allowed = allowed_submission_time(self.tier, start, self.stagger);
            Gate::Waiting(Duration::from_millis(allowed.saturating_sub(now_ms)))
        }
    }

    /// Forget a feed that is no longer due.
    pub fn not_due(&mut self, feed: &FeedId) {
        self.first_due.remove(feed);
    }

    /// Forget feeds whose update landed.
    pub fn landed(&mut self, feeds: &[FeedId]) {
        for feed in feeds {
            self.first_due.remove(feed);
        }
    }

    /// Number of feeds currently held back or due
    pub fn tracked(&self) -> usize {
        self.first_due.len()
    }
}
