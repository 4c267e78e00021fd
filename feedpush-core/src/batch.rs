use derive_new::new;
use itertools::Itertools;
use tracing::debug;

use crate::{Address, Feed, FeedId, SourceReport, UpdateReason};

/// A group of feeds updated through one call to a shared target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Name used in logs and metrics
    pub id: String,
    /// Contract receiving the update call
    pub target: Address,
    /// Function selector of the update call
    pub selector: [u8; 4],
    /// Fewer due feeds than this and no call is made, unless one of them is
    /// due on heartbeat
    pub min_batch_size: usize,
    /// Most feeds included in a single call
    pub max_batch_size: usize,
    /// Inactive batches are never polled
    pub active: bool,
    /// Feeds of the batch, in call order
    pub feeds: Vec<Feed>,
}

impl BatchConfig {
    /// Ids of the batch's feeds
    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.feeds.iter().map(|f| f.id).collect()
    }
}

/// A feed found due, with the report that will update it.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct DueUpdate {
    /// Feed to update
    pub feed: Feed,
    /// Why the update is due
    pub reason: UpdateReason,
    /// Latest upstream report
    pub report: SourceReport,
}

/// One call worth of updates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    /// Id of the batch config this call belongs to
    pub id: String,
    /// Call target
    pub target: Address,
    /// Call selector
    pub selector: [u8; 4],
    /// Updates, in feed order, at most `max_batch_size` of them
    pub updates: Vec<DueUpdate>,
}

impl Batch {
    /// Ids of the included feeds
    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.updates.iter().map(|u| u.feed.id).collect()
    }

    /// Whether any included feed is due on heartbeat
    pub fn has_heartbeat(&self) -> bool {
        self.updates
            .iter()
            .any(|u| u.reason == UpdateReason::Heartbeat)
    }
}

/// Group the due updates of `config` into calls.
///
/// Returns nothing when fewer than `min_batch_size` updates are due and none
/// of them is due on heartbeat; otherwise splits the updates, in order, into
/// calls of at most `max_batch_size` each.
pub fn collect_due(config: &BatchConfig, due: Vec<DueUpdate>) -> Vec<Batch> {
    if due.is_empty() {
        return vec![];
    }
    let heartbeat = due.iter().any(|u| u.reason == UpdateReason::Heartbeat);
    if due.len() < config.min_batch_size && !heartbeat {
        debug!(
            batch = %config.id,
            due = due.len(),
            min_batch_size = config.min_batch_size,
            "Not enough updates due, waiting for the next tick"
        );
        return vec![];
    }

    let mut batches = Vec::new();
    for chunk in &due.into_iter().chunks(config.max_batch_size.max(1)) {
        batches.push(Batch {
            id: config.id.clone(),
            target: config.target,
            selector: config.selector,
            updates: chunk.collect(),
        });
    }
    batches
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{Bytes, FeedRecord};

    fn feed(i: u8) -> Feed {
        Feed::new(
            FeedId::from([i; 32]),
            format!("feed-{i}"),
            Duration::from_secs(60),
            10_000,
            None,
        )
        .unwrap()
    }

    fn config(min_batch_size: usize, max_batch_size: usize) -> BatchConfig {
        BatchConfig {
            id: "worldchain".into(),
            target: Address::repeat_byte(0xaa),
            selector: [0x45, 0x85, 0xe3, 0x3b],
            min_batch_size,
            max_batch_size,
            active: true,
            feeds: (0..10).map(feed).collect(),
        }
    }

    fn due(i: u8, reason: UpdateReason) -> DueUpdate {
        let feed = feed(i);
        let record = FeedRecord::new(feed.id, 1, 0, 0);
        DueUpdate::new(feed, reason, SourceReport::new(record, Bytes::from(vec![i])))
    }

    #[test]
    fn splits_by_max_batch_size_keeping_order() {
        let updates: Vec<_> = (0..5).map(|i| due(i, UpdateReason::Deviation)).collect();
        let batches = collect_due(&config(1, 2), updates);
        let sizes: Vec<_> = batches.iter().map(|b| b.updates.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        let order: Vec<_> = batches.iter().flat_map(Batch::feed_ids).collect();
        assert_eq!(order, (0..5).map(|i| feed(i).id).collect::<Vec<_>>());
    }

    #[test]
    fn below_min_batch_size_waits() {
        let updates = vec![due(0, UpdateReason::Deviation), due(1, UpdateReason::EarlyDeviation)];
        assert!(collect_due(&config(3, 10), updates).is_empty());
    }

    #[test]
    fn heartbeat_bypasses_min_batch_size() {
        let updates = vec![due(0, UpdateReason::Deviation), due(1, UpdateReason::Heartbeat)];
        let batches = collect_due(&config(3, 10), updates);
        assert_eq!(batches.len(), 1);
        assert!(batches[0].has_heartbeat());
        assert_eq!(batches[0].updates.len(), 2);
    }

    #[test]
    fn nothing_due_means_no_call() {
        assert!(collect_due(&config(1, 10), vec![]).is_empty());
    }
}
