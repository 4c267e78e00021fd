use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use derive_new::new;
use feedpush_base::{settings::GasLimit, settings::TransactionConf, CacheInvalidator, CoreMetrics};
use feedpush_core::{
    escalate, Batch, FeeConfig, FeeMultipliers, FeedReader, PushError, PushResult, TierParams,
    TxFees, TxReceipt, UpdateSubmitter, H256, U256,
};
use feedpush_ethereum::encode_update_call;
use prometheus::{Gauge, Histogram, IntCounter, IntCounterVec};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, instrument, warn};

/// Where a submitted update stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    /// Not mined, or mined without enough confirmations yet
    Pending,
    /// Mined successfully with the required confirmations
    Confirmed {
        /// Inclusion block
        block: u64,
    },
    /// Mined but reverted
    Reverted {
        /// Inclusion block
        block: u64,
    },
    /// Not mined within the confirmation timeout
    TimedOut,
    /// Rejected before being mined
    Failed(String),
    /// Not mined, but the on-chain records already caught up with what we
    /// sent: a peer landed first
    Superseded,
}

impl TxState {
    /// Whether the feeds of the batch no longer need this update
    pub fn landed(&self) -> bool {
        matches!(self, TxState::Confirmed { .. } | TxState::Superseded)
    }

    fn metrics_label(&self) -> &'static str {
        match self {
            TxState::Pending => "pending",
            TxState::Confirmed { .. } => "confirmed",
            TxState::Reverted { .. } => "reverted",
            TxState::TimedOut => "timed_out",
            TxState::Failed(_) => "failed",
            TxState::Superseded => "superseded",
        }
    }
}

impl Display for TxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.metrics_label())
    }
}

/// A transaction sent for a batch, along with the ones it replaced.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    /// Hash of the latest transaction sent
    pub hash: H256,
    /// Nonce shared by the transaction and its replacements
    pub nonce: U256,
    /// Fees of the latest transaction
    pub fees: TxFees,
    /// Gas limit of the latest transaction
    pub gas_limit: U256,
    /// When the latest transaction was sent
    pub submitted_at: Instant,
    /// When the first transaction of this nonce was sent
    pub first_submitted_at: Instant,
    /// Replaced transactions, any of which may still get mined
    pub replaced: Vec<H256>,
}

impl PendingTransaction {
    fn hashes(&self) -> impl Iterator<Item = H256> + '_ {
        std::iter::once(self.hash).chain(self.replaced.iter().rev().copied())
    }
}

/// Transaction settings resolved for this worker's tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPolicy {
    fees: FeeConfig,
    multipliers: FeeMultipliers,
    gas_limit: GasLimit,
    confirmation_timeout: Duration,
    transaction_timeout: Duration,
    polling_interval: Duration,
    confirmations: u64,
}

impl TxPolicy {
    pub fn new(conf: &TransactionConf, params: &TierParams) -> Self {
        Self {
            fees: conf.fees.clone(),
            multipliers: params.fee_multipliers,
            gas_limit: conf.gas_limit,
            confirmation_timeout: conf.confirmation_timeout,
            transaction_timeout: conf.transaction_timeout,
            polling_interval: params.confirmation_polling_interval,
            confirmations: params.wait_for_confirmations,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerMetrics {
    batch: String,
    transactions: IntCounterVec,
    submissions: IntCounter,
    confirmation_duration: Histogram,
    priority_fee: Gauge,
    max_fee: Gauge,
    l1_fee: Gauge,
    errors: IntCounterVec,
}

impl TrackerMetrics {
    pub fn new(metrics: &CoreMetrics, batch: &str) -> Self {
        Self {
            batch: batch.to_owned(),
            transactions: metrics.transactions(),
            submissions: metrics.submissions().with_label_values(&[batch]),
            confirmation_duration: metrics.confirmation_duration().with_label_values(&[batch]),
            priority_fee: metrics.priority_fee().with_label_values(&[batch]),
            max_fee: metrics.max_fee().with_label_values(&[batch]),
            l1_fee: metrics.l1_fee().with_label_values(&[batch]),
            errors: metrics.errors(),
        }
    }

    fn outcome(&self, state: &TxState) {
        self.transactions
            .with_label_values(&[&self.batch, state.metrics_label()])
            .inc();
    }

    pub fn error(&self, err: &PushError) {
        self.errors
            .with_label_values(&[&self.batch, err.metrics_label()])
            .inc();
    }

    fn sent(&self, fees: &TxFees, l1_fee: Option<U256>) {
        self.submissions.inc();
        self.priority_fee.set(fees.priority_fee().low_u128() as f64);
        self.max_fee.set(fees.max_fee().low_u128() as f64);
        if let Some(l1_fee) = l1_fee {
            self.l1_fee.set(l1_fee.low_u128() as f64);
        }
    }
}

/// Builds, sends, replaces and follows the update transactions of one batch.
///
/// A whole attempt is bounded by the transaction timeout. Within it, a
/// transaction that is not mined within the confirmation timeout is replaced
/// with escalated fees and the same nonce. A transaction still unmined when
/// an attempt ends keeps its nonce, and the next attempt replaces it.
#[derive(new, Debug)]
pub struct TransactionTracker {
    submitter: Arc<dyn UpdateSubmitter>,
    reader: Arc<dyn FeedReader>,
    policy: TxPolicy,
    invalidator: CacheInvalidator,
    metrics: TrackerMetrics,
    /// Last transaction of a previous attempt that was not seen mined
    #[new(default)]
    unconfirmed: Option<PendingTransaction>,
}

impl TransactionTracker {
    /// Send the update call of `batch`. With `previous` set, the new
    /// transaction replaces it: same nonce, fees escalated from its fees.
    pub async fn submit(
        &self,
        batch: &Batch,
        previous: Option<&PendingTransaction>,
    ) -> PushResult<PendingTransaction> {
        let call = encode_update_call(batch);

        let estimate = self.submitter.estimate_fees(&self.policy.fees).await?;
        let mut fees = self.policy.fees.resolve(estimate, &self.policy.multipliers);
        if let Some(previous) = previous {
            fees = escalate(&previous.fees, &fees);
        }

        let gas_limit = match self.policy.gas_limit {
            GasLimit::Fixed(limit) => limit,
            GasLimit::Estimate => GasLimit::with_estimate(self.submitter.estimate_gas(&call).await?),
        };

        // only reported, the L1 fee is charged outside the fee market fields
        let l1_fee = match self.submitter.estimate_l1_fee(&call, &fees, gas_limit).await {
            Ok(l1_fee) => l1_fee,
            Err(err) => {
                debug!(?err, "Could not quote the L1 data fee");
                None
            }
        };

        let sent = self
            .submitter
            .send(&call, &fees, gas_limit, previous.map(|p| p.nonce))
            .await?;
        self.metrics.sent(&fees, l1_fee);

        let now = Instant::now();
        let pending = match previous {
            Some(previous) => {
                let mut replaced = previous.replaced.clone();
                replaced.push(previous.hash);
                PendingTransaction {
                    hash: sent.hash,
                    nonce: sent.nonce,
                    fees,
                    gas_limit,
                    submitted_at: now,
                    first_submitted_at: previous.first_submitted_at,
                    replaced,
                }
            }
            None => PendingTransaction {
                hash: sent.hash,
                nonce: sent.nonce,
                fees,
                gas_limit,
                submitted_at: now,
                first_submitted_at: now,
                replaced: vec![],
            },
        };
        info!(
            tx_hash = ?pending.hash,
            nonce = %pending.nonce,
            replacements = pending.replaced.len(),
            max_fee = %fees.max_fee(),
            priority_fee = %fees.priority_fee(),
            %gas_limit,
            ?l1_fee,
            feeds = batch.updates.len(),
            "Submitted update transaction"
        );
        Ok(pending)
    }

    /// Receipt of whichever transaction of `pending` got mined, if any.
    async fn mined(&self, pending: &PendingTransaction) -> PushResult<Option<TxReceipt>> {
        for hash in pending.hashes() {
            if let Some(receipt) = self.submitter.receipt(hash).await? {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    /// Current state of `pending`.
    pub async fn poll(&self, batch: &Batch, pending: &PendingTransaction) -> PushResult<TxState> {
        if let Some(receipt) = self.mined(pending).await? {
            if !receipt.success {
                return Ok(TxState::Reverted {
                    block: receipt.block_number,
                });
            }
            if self.policy.confirmations > 1 {
                let head = self.submitter.block_number().await?;
                let confirmations = head.saturating_sub(receipt.block_number) + 1;
                if confirmations < self.policy.confirmations {
                    debug!(tx_hash = ?pending.hash, confirmations, "Waiting for more confirmations");
                    return Ok(TxState::Pending);
                }
            }
            return Ok(TxState::Confirmed {
                block: receipt.block_number,
            });
        }

        if self.superseded(batch).await {
            return Ok(TxState::Superseded);
        }
        if pending.submitted_at.elapsed() >= self.policy.confirmation_timeout {
            return Ok(TxState::TimedOut);
        }
        Ok(TxState::Pending)
    }

    /// Whether the chain already holds records at least as recent as every
    /// report of `batch`.
    async fn superseded(&self, batch: &Batch) -> bool {
        let records = match self.reader.read_records(&batch.feed_ids()).await {
            Ok(records) => records,
            Err(err) => {
                debug!(?err, "Could not check on-chain records while polling");
                return false;
            }
        };
        let onchain: HashMap<_, _> = records
            .into_iter()
            .map(|record| (record.feed_id, record.timestamp_ms))
            .collect();
        batch.updates.iter().all(|update| {
            onchain
                .get(&update.feed.id)
                .is_some_and(|ts| *ts >= update.report.record.timestamp_ms)
        })
    }

    /// Poll `pending` until it leaves [`TxState::Pending`]. Poll errors are
    /// retried until the confirmation timeout.
    pub async fn wait_for_confirmation(&self, batch: &Batch, pending: &PendingTransaction) -> TxState {
        loop {
            match self.poll(batch, pending).await {
                Ok(TxState::Pending) => {}
                Ok(state) => return state,
                Err(err) => {
                    warn!(tx_hash = ?pending.hash, ?err, "Failed to poll transaction");
                    self.metrics.error(&err);
                    if pending.submitted_at.elapsed() >= self.policy.confirmation_timeout {
                        return TxState::TimedOut;
                    }
                }
            }
            sleep(self.policy.polling_interval).await;
        }
    }

    /// Land `batch`: submit, wait, replace on timeout, until it is confirmed,
    /// superseded, fails, or the transaction timeout runs out. Landed
    /// updates invalidate the cached records of their feeds.
    #[instrument(skip_all, fields(batch = %batch.id, feeds = batch.updates.len()))]
    pub async fn execute(&mut self, batch: &Batch) -> TxState {
        let mut last = match self.unconfirmed.take() {
            Some(stuck) => self.resume(stuck).await,
            None => None,
        };
        let mut state =
            match timeout(self.policy.transaction_timeout, self.attempt(batch, &mut last)).await {
                Ok(state) => state,
                Err(_) => TxState::TimedOut,
            };
        if state == TxState::TimedOut {
            if let Some(mined) = self.settle_mined(last.as_ref()).await {
                state = mined;
            }
        }
        self.finish(batch, &state, last.as_ref());
        if matches!(
            state,
            TxState::TimedOut | TxState::Superseded | TxState::Failed(_)
        ) {
            self.unconfirmed = last;
        }
        state
    }

    /// An unmined transaction left by an earlier attempt still holds its
    /// nonce, so the next transaction replaces it. Once mined, the nonce is
    /// spent and a fresh one is used.
    async fn resume(&self, stuck: PendingTransaction) -> Option<PendingTransaction> {
        match self.mined(&stuck).await {
            Ok(Some(receipt)) => {
                debug!(
                    tx_hash = ?stuck.hash,
                    block = receipt.block_number,
                    "Transaction of an earlier attempt got mined"
                );
                None
            }
            Ok(None) => {
                info!(
                    tx_hash = ?stuck.hash,
                    nonce = %stuck.nonce,
                    "Replacing the unmined transaction of an earlier attempt"
                );
                Some(stuck)
            }
            Err(err) => {
                // a spent nonce makes the replacement fail, which drops it
                self.metrics.error(&err);
                warn!(?err, tx_hash = ?stuck.hash, "Could not check earlier transaction");
                Some(stuck)
            }
        }
    }

    /// Final state of a transaction mined but still short of the required
    /// confirmations when the transaction timeout ran out.
    async fn settle_mined(&self, last: Option<&PendingTransaction>) -> Option<TxState> {
        let receipt = match self.mined(last?).await {
            Ok(receipt) => receipt?,
            Err(err) => {
                self.metrics.error(&err);
                return None;
            }
        };
        debug!(
            block = receipt.block_number,
            confirmations = self.policy.confirmations,
            "Transaction mined without reaching the required confirmations in time"
        );
        Some(if receipt.success {
            TxState::Confirmed {
                block: receipt.block_number,
            }
        } else {
            TxState::Reverted {
                block: receipt.block_number,
            }
        })
    }

    async fn attempt(&self, batch: &Batch, last: &mut Option<PendingTransaction>) -> TxState {
        let started = Instant::now();
        loop {
            let pending = match self.submit(batch, last.as_ref()).await {
                Ok(pending) => pending,
                Err(err) => {
                    self.metrics.error(&err);
                    // a replacement is refused once the replaced transaction is mined
                    if let Some(previous) = last.as_ref() {
                        if let Ok(state @ (TxState::Confirmed { .. } | TxState::Reverted { .. })) =
                            self.poll(batch, previous).await
                        {
                            return state;
                        }
                    }
                    // a rejected replacement may mean its nonce is spent
                    if !matches!(err, PushError::RpcUnavailable(_)) {
                        *last = None;
                    }
                    warn!(?err, "Transaction failed");
                    return TxState::Failed(err.to_string());
                }
            };
            *last = Some(pending.clone());

            match self.wait_for_confirmation(batch, &pending).await {
                TxState::TimedOut if started.elapsed() < self.policy.transaction_timeout => {
                    info!(
                        tx_hash = ?pending.hash,
                        nonce = %pending.nonce,
                        "Transaction not mined in time, replacing it"
                    );
                }
                state => return state,
            }
        }
    }

    fn finish(&self, batch: &Batch, state: &TxState, last: Option<&PendingTransaction>) {
        self.metrics.outcome(state);
        let hash = last.map(|p| p.hash).unwrap_or_default();
        match state {
            TxState::Confirmed { block } => {
                if let Some(last) = last {
                    self.metrics
                        .confirmation_duration
                        .observe(last.first_submitted_at.elapsed().as_secs_f64());
                }
                info!(tx_hash = ?hash, block, "Update transaction confirmed");
            }
            TxState::Superseded => {
                info!(tx_hash = ?hash, "Feeds already updated by a peer, stopped polling");
            }
            TxState::Reverted { block } => {
                let err = PushError::TransactionReverted(hash);
                self.metrics.error(&err);
                warn!(%err, block, "Update transaction reverted");
            }
            TxState::TimedOut => {
                let err = PushError::TransactionTimedOut(hash);
                self.metrics.error(&err);
                warn!(%err, "Giving up on update transaction until the next due cycle");
            }
            TxState::Failed(_) | TxState::Pending => {}
        }
        // a revert usually means a peer landed the same reports first
        if state.landed() || matches!(state, TxState::Reverted { .. }) {
            self.invalidator.invalidate(batch.feed_ids());
        }
    }
}
