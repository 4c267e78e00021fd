use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use feedpush_base::{CoreMetrics, FeedStateCache, UptimeNotifier};
use feedpush_core::{
    check_update, collect_due, utils::now_millis, BatchConfig, ClockSkewConfig,
    ClockSkewEstimator, ClockSkewSample, DueUpdate, Feed, FeedId, FeedReader, FeedSource,
    PushError, PushResult, TierParams, UpdateReason,
};
use prometheus::{GaugeVec, Histogram, IntCounterVec, IntGauge};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::scheduler::{Gate, TierScheduler};
use crate::tracker::{TransactionTracker, TxState};

/// What a single tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// Due feeds included in a call
    pub submitted: usize,
    /// Due feeds held back for earlier tiers
    pub waiting: usize,
    /// Due feeds dropped because nothing newer than the chain was available
    pub skipped: usize,
    /// Outcome of every call made
    pub outcomes: Vec<TxState>,
}

#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    batch: String,
    updates_due: IntCounterVec,
    updates_skipped: IntCounterVec,
    feed_age: GaugeVec,
    clock_skew: IntGauge,
    tick_duration: Histogram,
    errors: IntCounterVec,
}

impl WorkerMetrics {
    pub fn new(metrics: &CoreMetrics, batch: &str) -> Self {
        Self {
            batch: batch.to_owned(),
            updates_due: metrics.updates_due(),
            updates_skipped: metrics.updates_skipped(),
            feed_age: metrics.feed_age(),
            clock_skew: metrics.clock_skew().with_label_values(&[batch]),
            tick_duration: metrics.tick_duration().with_label_values(&[batch]),
            errors: metrics.errors(),
        }
    }

    fn due(&self, feed: &Feed, reason: UpdateReason) {
        self.updates_due
            .with_label_values(&[&self.batch, &feed.desc, reason.as_str()])
            .inc();
    }

    fn skipped(&self, feed: &Feed, cause: &str) {
        self.updates_skipped
            .with_label_values(&[&self.batch, &feed.desc, cause])
            .inc();
    }

    fn age(&self, feed: &Feed, age: Duration) {
        self.feed_age
            .with_label_values(&[&self.batch, &feed.desc])
            .set(age.as_secs_f64());
    }

    fn error(&self, err: &PushError) {
        self.errors
            .with_label_values(&[&self.batch, err.metrics_label()])
            .inc();
    }
}

/// Keeps the feeds of one batch up to date.
///
/// Every tick it reads the latest upstream reports and the on-chain records,
/// decides which feeds are due, holds them back until this worker's tier may
/// act, and lands the rest through the [`TransactionTracker`]. Ticks never
/// overlap: a tick that submits a transaction lasts until the transaction is
/// settled.
#[derive(Debug)]
pub struct BatchWorker {
    config: BatchConfig,
    polling_interval: Duration,
    reader: Arc<dyn FeedReader>,
    source: Arc<dyn FeedSource>,
    cache: FeedStateCache,
    skew: ClockSkewEstimator,
    scheduler: TierScheduler,
    tracker: TransactionTracker,
    uptime: Arc<UptimeNotifier>,
    metrics: WorkerMetrics,
    /// Source timestamp of the last report sampled for clock skew, per feed
    last_sample: HashMap<FeedId, u64>,
}

impl BatchWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BatchConfig,
        params: &TierParams,
        stagger: Duration,
        polling_interval: Duration,
        clock_skew: ClockSkewConfig,
        reader: Arc<dyn FeedReader>,
        source: Arc<dyn FeedSource>,
        cache: FeedStateCache,
        tracker: TransactionTracker,
        uptime: Arc<UptimeNotifier>,
        metrics: WorkerMetrics,
    ) -> Self {
        Self {
            config,
            polling_interval,
            reader,
            source,
            cache,
            skew: ClockSkewEstimator::new(clock_skew),
            scheduler: TierScheduler::new(params.tier, stagger),
            tracker,
            uptime,
            metrics,
            last_sample: HashMap::new(),
        }
    }

    /// Id of the batch this worker updates
    pub fn batch_id(&self) -> &str {
        &self.config.id
    }

    /// Tick every polling interval, forever. Tick errors are logged and the
    /// work is retried on the next tick.
    pub async fn run(mut self) {
        info!(
            feeds = self.config.feeds.len(),
            polling_interval = ?self.polling_interval,
            "Starting batch worker"
        );
        let mut ticker = interval(self.polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let started = Instant::now();
            match self.tick(now_millis()).await {
                Ok(summary) if !summary.outcomes.is_empty() => {
                    debug!(?summary, "Tick done");
                }
                Ok(_) => {}
                Err(err) => {
                    self.metrics.error(&err);
                    warn!(?err, "Tick failed, retrying next tick");
                }
            }
            self.metrics
                .tick_duration
                .observe(started.elapsed().as_secs_f64());
        }
    }

    /// Evaluate every feed of the batch at `now_ms` and submit what is due.
    ///
    /// A failed read leaves no state behind, the next tick starts over.
    pub async fn tick(&mut self, now_ms: u64) -> PushResult<TickSummary> {
        let mut summary = TickSummary::default();

        let mut latest = Vec::with_capacity(self.config.feeds.len());
        for feed in &self.config.feeds {
            let Some(report) = self.source.latest_report(&feed.id).await? else {
                trace!(feed = %feed.desc, "No upstream report yet");
                continue;
            };
            let record = &report.record;
            if self
                .last_sample
                .get(&feed.id)
                .map_or(true, |ts| *ts < record.timestamp_ms)
            {
                self.last_sample.insert(feed.id, record.timestamp_ms);
                self.skew
                    .record(ClockSkewSample::new(record.observed_at_ms, record.timestamp_ms));
            }
            latest.push((feed, report));
        }

        let skew = self.skew.offset_or_zero(now_ms);
        self.metrics.clock_skew.set(skew);
        if latest.is_empty() {
            return Ok(summary);
        }

        let ids: Vec<FeedId> = latest.iter().map(|(feed, _)| feed.id).collect();
        let onchain = self.cache.get_or_read(&self.reader, &ids).await?;
        self.uptime.notify();

        let mut due = Vec::new();
        for (feed, report) in latest {
            let current = onchain.get(&feed.id);
            let check = check_update(feed, &report.record, current, now_ms, skew);
            if current.is_some() {
                self.metrics.age(feed, check.age);
            }
            let Some(reason) = check.reason else {
                self.scheduler.not_due(&feed.id);
                continue;
            };

            if current.is_some_and(|c| report.record.timestamp_ms <= c.timestamp_ms) {
                debug!(
                    feed = %feed.desc,
                    %reason,
                    report_ts = report.record.timestamp_ms,
                    "Latest report is not newer than the on-chain record"
                );
                self.metrics.skipped(feed, "not_newer");
                summary.skipped += 1;
                continue;
            }

            match self.scheduler.due(feed.id, now_ms) {
                Gate::Open => {
                    debug!(
                        feed = %feed.desc,
                        %reason,
                        age = ?check.age,
                        deviation = check.deviation,
                        skew,
                        "Update due"
                    );
                    due.push(DueUpdate::new(feed.clone(), reason, report));
                }
                Gate::Waiting(wait) => {
                    trace!(feed = %feed.desc, %reason, ?wait, "Waiting for earlier tiers");
                    summary.waiting += 1;
                }
            }
        }

        for batch in collect_due(&self.config, due) {
            for update in &batch.updates {
                self.metrics.due(&update.feed, update.reason);
            }
            summary.submitted += batch.updates.len();
            let state = self.tracker.execute(&batch).await;
            if state.landed() {
                self.scheduler.landed(&batch.feed_ids());
            }
            summary.outcomes.push(state);
        }
        Ok(summary)
    }
}
