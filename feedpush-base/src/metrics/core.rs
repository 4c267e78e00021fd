use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use feedpush_core::WorkerTier;
use prometheus::{
    histogram_opts, labels, opts, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, Encoder, GaugeVec, HistogramVec, IntCounterVec,
    IntGaugeVec, Registry,
};

/// Macro to prefix a string with the namespace.
macro_rules! namespaced {
    ($name:expr) => {
        format!("{}_{}", super::NAMESPACE, $name)
    };
}

const CONFIRMATION_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 12.0, 20.0];
const TICK_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Metrics of one agent process
pub struct CoreMetrics {
    /// Metrics registry for adding new metrics and gathering reports
    registry: Registry,
    const_labels: HashMap<String, String>,
    listen_port: u16,
    agent_name: String,

    updates_due: IntCounterVec,
    updates_skipped: IntCounterVec,
    transactions: IntCounterVec,
    submissions: IntCounterVec,
    confirmation_duration: HistogramVec,
    priority_fee: GaugeVec,
    max_fee: GaugeVec,
    l1_fee: GaugeVec,
    feed_age: GaugeVec,
    clock_skew: IntGaugeVec,
    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
    tick_duration: HistogramVec,
    errors: IntCounterVec,
}

impl CoreMetrics {
    /// Track metrics for a particular agent name.
    ///
    /// - `for_agent` name of the agent these metrics are tracking.
    /// - `worker_tier` tier of this worker, set as a const label.
    /// - `listen_port` port to start the HTTP server on.
    /// - `registry` prometheus registry to attach the metrics to
    pub fn new(
        for_agent: &str,
        worker_tier: WorkerTier,
        listen_port: u16,
        registry: Registry,
    ) -> prometheus::Result<Self> {
        let const_labels: HashMap<String, String> = labels! {
            namespaced!("baselib_version") => env!("CARGO_PKG_VERSION").into(),
            "agent".into() => for_agent.into(),
            "worker_tier".into() => worker_tier.to_string(),
        };
        let const_labels_ref = const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect::<HashMap<_, _>>();

        let updates_due = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("updates_due_total"),
                "Number of due feed updates included in an update call",
                const_labels_ref
            ),
            &["batch", "feed", "reason"],
            registry
        )?;

        let updates_skipped = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("updates_skipped_total"),
                "Number of due updates dropped before submission",
                const_labels_ref
            ),
            &["batch", "feed", "cause"],
            registry
        )?;

        let transactions = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("transactions_total"),
                "Number of update transactions by final outcome",
                const_labels_ref
            ),
            &["batch", "outcome"],
            registry
        )?;

        let submissions = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("transaction_submissions_total"),
                "Number of transactions sent, replacements included",
                const_labels_ref
            ),
            &["batch"],
            registry
        )?;

        let confirmation_duration = register_histogram_vec_with_registry!(
            histogram_opts!(
                namespaced!("transaction_confirmation_seconds"),
                "Time from first submission to confirmation of an update transaction",
                CONFIRMATION_BUCKETS.to_vec(),
                const_labels.clone()
            ),
            &["batch"],
            registry
        )?;

        let priority_fee = register_gauge_vec_with_registry!(
            opts!(
                namespaced!("last_priority_fee_wei"),
                "Priority fee (or gas price) of the last transaction sent",
                const_labels_ref
            ),
            &["batch"],
            registry
        )?;

        let max_fee = register_gauge_vec_with_registry!(
            opts!(
                namespaced!("last_max_fee_wei"),
                "Max fee per gas (or gas price) of the last transaction sent",
                const_labels_ref
            ),
            &["batch"],
            registry
        )?;

        let l1_fee = register_gauge_vec_with_registry!(
            opts!(
                namespaced!("last_l1_fee_wei"),
                "L1 data fee quoted for the last transaction sent, on rollups with a fee oracle",
                const_labels_ref
            ),
            &["batch"],
            registry
        )?;

        let feed_age = register_gauge_vec_with_registry!(
            opts!(
                namespaced!("onchain_feed_age_seconds"),
                "Skew corrected age of the on-chain record of a feed",
                const_labels_ref
            ),
            &["batch", "feed"],
            registry
        )?;

        let clock_skew = register_int_gauge_vec_with_registry!(
            opts!(
                namespaced!("clock_skew_ms"),
                "Estimated offset of the local clock over the source clock",
                const_labels_ref
            ),
            &["batch"],
            registry
        )?;

        let cache_hits = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("cache_hits_total"),
                "Number of cache hits",
                const_labels_ref
            ),
            &["cache_name"],
            registry
        )?;

        let cache_misses = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("cache_misses_total"),
                "Number of cache misses",
                const_labels_ref
            ),
            &["cache_name"],
            registry
        )?;

        let tick_duration = register_histogram_vec_with_registry!(
            histogram_opts!(
                namespaced!("tick_duration_seconds"),
                "Time spent evaluating and submitting one tick of a batch",
                TICK_BUCKETS.to_vec(),
                const_labels.clone()
            ),
            &["batch"],
            registry
        )?;

        let errors = register_int_counter_vec_with_registry!(
            opts!(
                namespaced!("errors_total"),
                "Number of errors by kind",
                const_labels_ref
            ),
            &["batch", "kind"],
            registry
        )?;

        Ok(Self {
            agent_name: for_agent.into(),
            registry,
            listen_port,
            const_labels,
            updates_due,
            updates_skipped,
            transactions,
            submissions,
            confirmation_duration,
            priority_fee,
            max_fee,
            l1_fee,
            feed_age,
            clock_skew,
            cache_hits,
            cache_misses,
            tick_duration,
            errors,
        })
    }

    /// Due feeds included in an update call.
    ///
    /// Labels:
    /// - `batch`: batch id
    /// - `feed`: feed description
    /// - `reason`: `heartbeat`, `early-deviation` or `deviation`
    pub fn updates_due(&self) -> IntCounterVec {
        self.updates_due.clone()
    }

    /// Due updates dropped before submission.
    ///
    /// Labels:
    /// - `batch`: batch id
    /// - `feed`: feed description
    /// - `cause`: why it was dropped, e.g. `not_newer`
    pub fn updates_skipped(&self) -> IntCounterVec {
        self.updates_skipped.clone()
    }

    /// Transactions by outcome.
    ///
    /// Labels:
    /// - `batch`: batch id
    /// - `outcome`: `confirmed`, `superseded`, `timed_out`, `reverted` or `failed`
    pub fn transactions(&self) -> IntCounterVec {
        self.transactions.clone()
    }

    /// Transactions sent, replacements included.
    pub fn submissions(&self) -> IntCounterVec {
        self.submissions.clone()
    }

    /// Time to confirmation.
    pub fn confirmation_duration(&self) -> HistogramVec {
        self.confirmation_duration.clone()
    }

    /// Priority fee of the last transaction sent, per batch.
    pub fn priority_fee(&self) -> GaugeVec {
        self.priority_fee.clone()
    }

    /// Max fee of the last transaction sent, per batch.
    pub fn max_fee(&self) -> GaugeVec {
        self.max_fee.clone()
    }

    /// L1 data fee of the last transaction sent, per batch.
    pub fn l1_fee(&self) -> GaugeVec {
        self.l1_fee.clone()
    }

    /// Skew corrected age of on-chain records.
    pub fn feed_age(&self) -> GaugeVec {
        self.feed_age.clone()
    }

    /// Current clock skew estimate.
    pub fn clock_skew(&self) -> IntGaugeVec {
        self.clock_skew.clone()
    }

    /// Feed state cache hits.
    pub fn cache_hits(&self) -> IntCounterVec {
        self.cache_hits.clone()
    }

    /// Feed state cache misses.
    pub fn cache_misses(&self) -> IntCounterVec {
        self.cache_misses.clone()
    }

    /// Duration of worker ticks.
    pub fn tick_duration(&self) -> HistogramVec {
        self.tick_duration.clone()
    }

    /// Errors by `PushError` kind.
    pub fn errors(&self) -> IntCounterVec {
        self.errors.clone()
    }

    /// Registry the metrics are attached to
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Labels set on every metric
    pub fn const_labels(&self) -> &HashMap<String, String> {
        &self.const_labels
    }

    /// Port the metrics server listens on
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Name of the agent
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Gather available metrics into an encoded (plaintext, OpenMetrics format)
    /// report.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }
}

impl Debug for CoreMetrics {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "CoreMetrics {{ agent_name: {}, listen_port: {} }}",
            self.agent_name, self.listen_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_carry_agent_and_tier() {
        let metrics = CoreMetrics::new("pusher", WorkerTier::new(2).unwrap(), 9090, Registry::new())
            .unwrap();
        metrics
            .updates_due()
            .with_label_values(&["worldchain", "ETH/USD", "heartbeat"])
            .inc();
        let report = String::from_utf8(metrics.gather().unwrap()).unwrap();
        assert!(report.contains("feedpush_updates_due_total"));
        assert!(report.contains(r#"worker_tier="2""#));
        assert!(report.contains(r#"reason="heartbeat""#));
    }

    #[test]
    fn registering_twice_fails() {
        let registry = Registry::new();
        CoreMetrics::new("pusher", WorkerTier::PRIMARY, 9090, registry.clone()).unwrap();
        assert!(CoreMetrics::new("pusher", WorkerTier::PRIMARY, 9090, registry).is_err());
    }
}
