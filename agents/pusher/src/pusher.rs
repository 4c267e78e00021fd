use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use feedpush_base::{
    source::{LatestReports, RestSource},
    BaseAgent, CacheMetrics, CoreMetrics, FeedStateCache, UptimeNotifier,
};
use feedpush_core::{FeedId, FeedReader, FeedSource, UpdateSubmitter};
use feedpush_ethereum::{build_signing_provider, EthereumFeedReader, EthereumSubmitter};
use futures::future::try_join_all;
use itertools::Itertools;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

use crate::settings::PusherSettings;
use crate::tracker::{TrackerMetrics, TransactionTracker, TxPolicy};
use crate::worker::{BatchWorker, WorkerMetrics};

/// A pusher agent: one [`BatchWorker`] per active batch, sharing a signer,
/// an upstream report store and an uptime notifier.
pub struct Pusher {
    source: Arc<RestSource>,
    reports: Arc<LatestReports>,
    feeds: Vec<FeedId>,
    workers: Vec<BatchWorker>,
    tier: String,
}

impl Debug for Pusher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pusher")
            .field("tier", &self.tier)
            .field("feeds", &self.feeds.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[async_trait]
impl BaseAgent for Pusher {
    const AGENT_NAME: &'static str = "pusher";

    type Settings = PusherSettings;

    async fn from_settings(settings: Self::Settings, metrics: Arc<CoreMetrics>) -> Result<Self>
    where
        Self: Sized,
    {
        let params = settings.tier_params()?;
        let chain = &settings.chain;

        let provider = build_signing_provider(
            &chain.rpc_url,
            chain.signer_key.expose(),
            chain.chain_id,
            chain.block_time / 2,
        )?;
        let submitter = EthereumSubmitter::from_provider(provider.clone(), chain.chain_id)?
            .with_l1_fee_oracle(settings.tx.op_gas_price_oracle);
        info!(
            sender = ?submitter.sender(),
            chain = %chain.name,
            l1_fee_oracle = ?settings.tx.op_gas_price_oracle,
            "Loaded signer"
        );
        let submitter: Arc<dyn UpdateSubmitter> = Arc::new(submitter);

        let reports = Arc::new(LatestReports::new());
        let source = Arc::new(RestSource::new(settings.source.clone())?);
        let uptime = Arc::new(UptimeNotifier::new(chain.uptime_webhook_url.clone()));

        let mut workers = Vec::new();
        for batch in settings.active_batches() {
            let reader: Arc<dyn FeedReader> = Arc::new(
                EthereumFeedReader::new(provider.clone(), batch.target, chain.multicall_address)
                    .await
                    .wrap_err_with(|| format!("Failed to build reader of batch {}", batch.id))?,
            );
            let (cache, invalidator) = FeedStateCache::new(
                batch.id.clone(),
                params.cache_ttl,
                Some(CacheMetrics {
                    hits: metrics.cache_hits().with_label_values(&[&batch.id]),
                    misses: metrics.cache_misses().with_label_values(&[&batch.id]),
                }),
            );
            let tracker = TransactionTracker::new(
                submitter.clone(),
                reader.clone(),
                TxPolicy::new(&settings.tx, &params),
                invalidator,
                TrackerMetrics::new(&metrics, &batch.id),
            );
            workers.push(BatchWorker::new(
                batch.clone(),
                &params,
                settings.tiers.stagger_interval,
                settings.polling_interval,
                settings.clock_skew,
                reader,
                reports.clone() as Arc<dyn FeedSource>,
                cache,
                tracker,
                uptime.clone(),
                WorkerMetrics::new(&metrics, &batch.id),
            ));
        }

        let feeds = settings
            .active_batches()
            .flat_map(|batch| batch.feed_ids())
            .unique()
            .collect();

        Ok(Self {
            source,
            reports,
            feeds,
            workers,
            tier: params.tier.to_string(),
        })
    }

    #[allow(clippy::async_yields_async)]
    async fn run(self) {
        let mut tasks: Vec<JoinHandle<()>> = vec![self.source.spawn_poller(self.feeds, self.reports)];

        for worker in self.workers {
            let span = info_span!("BatchWorker", batch = %worker.batch_id(), tier = %self.tier);
            tasks.push(tokio::spawn(async move { worker.run().await }.instrument(span)));
        }

        // Note that this only returns an error if one of the tasks panics
        if let Err(err) = try_join_all(tasks).await {
            error!(?err, "One of the pusher tasks returned an error");

            // A panicked worker would silently stop updating its batch
            std::process::exit(1)
        }
    }
}
