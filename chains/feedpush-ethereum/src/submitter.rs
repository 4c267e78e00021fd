use std::sync::Arc;

use async_trait::async_trait;
use derive_new::new;
use ethers::providers::{Middleware, MiddlewareError};
use ethers::types::{
    transaction::eip2718::TypedTransaction, BlockNumber, Eip1559TransactionRequest,
    TransactionRequest, U64,
};
use feedpush_core::{
    utils::{percentile, short_hex},
    Address, FeeConfig, FeeEstimate, PushError, PushResult, SentTransaction, TxFees, TxReceipt,
    UpdateCall, UpdateSubmitter, H256, U256,
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{contracts::GasPriceOracle, EthereumError};

/// Signs and sends update transactions through a provider with a signer
/// attached, and follows them until they are mined.
///
/// Sends are serialised per sender, so concurrent batches never pick the
/// same nonce.
#[derive(new, Debug)]
pub struct EthereumSubmitter<M> {
    provider: Arc<M>,
    sender: Address,
    chain_id: u64,
    /// Highest nonce this submitter sent a transaction with
    #[new(default)]
    last_nonce: Mutex<Option<U256>>,
    /// OP stack fee oracle quoting the L1 data fee
    #[new(default)]
    l1_fee_oracle: Option<Address>,
}

/// Next fresh nonce: the node's pending count, unless it lags behind a
/// transaction we already sent.
fn next_nonce(pending_count: U256, last_sent: Option<U256>) -> U256 {
    match last_sent {
        Some(last) => pending_count.max(last + 1),
        None => pending_count,
    }
}

impl<M> EthereumSubmitter<M>
where
    M: Middleware + 'static,
{
    /// Submitter sending from the provider's default sender.
    pub fn from_provider(provider: Arc<M>, chain_id: u64) -> PushResult<Self> {
        let sender = provider.default_sender().ok_or(EthereumError::NoSender)?;
        Ok(Self::new(provider, sender, chain_id))
    }

    /// Quote the L1 data fee of every transaction from `oracle`.
    pub fn with_l1_fee_oracle(mut self, oracle: Option<Address>) -> Self {
        self.l1_fee_oracle = oracle;
        self
    }

    /// Address transactions are sent from
    pub fn sender(&self) -> Address {
        self.sender
    }

    fn build_tx(&self, call: &UpdateCall, fees: &TxFees, gas_limit: U256, nonce: U256) -> TypedTransaction {
        match *fees {
            TxFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(self.sender)
                .to(call.target)
                .data(call.data.clone())
                .gas(gas_limit)
                .nonce(nonce)
                .chain_id(self.chain_id)
                .max_fee_per_gas(max_fee_per_gas)
                .max_priority_fee_per_gas(max_priority_fee_per_gas)
                .into(),
            TxFees::Legacy { gas_price } => TransactionRequest::new()
                .from(self.sender)
                .to(call.target)
                .data(call.data.clone())
                .gas(gas_limit)
                .nonce(nonce)
                .chain_id(self.chain_id)
                .gas_price(gas_price)
                .into(),
        }
    }

    async fn estimate_eip1559(&self, percentile_rank: u8, historical_blocks: u64) -> PushResult<FeeEstimate> {
        let history = self
            .provider
            .fee_history(
                historical_blocks,
                BlockNumber::Latest,
                &[f64::from(percentile_rank)],
            )
            .await
            .map_err(PushError::rpc)?;

        let base_fee = percentile(&history.base_fee_per_gas, percentile_rank)
            .ok_or(EthereumError::EmptyFeeHistory(historical_blocks))?;
        let rewards: Vec<U256> = history
            .reward
            .iter()
            .filter_map(|block| block.first().copied())
            .collect();
        // blocks without transactions carry no reward sample
        let priority_fee = percentile(&rewards, percentile_rank).unwrap_or_default();

        debug!(%base_fee, %priority_fee, blocks = history.base_fee_per_gas.len(), "Sampled fee history");
        Ok(FeeEstimate::Eip1559 {
            base_fee,
            priority_fee,
        })
    }
}

/// Rejections answered by the node are final for this transaction; anything
/// else means the node could not be reached.
fn classify_send_error<E: MiddlewareError + 'static>(err: E) -> PushError {
    match err.as_error_response() {
        Some(response) => PushError::TransactionFailed(response.message.clone()),
        None => PushError::rpc(err),
    }
}

#[async_trait]
impl<M> UpdateSubmitter for EthereumSubmitter<M>
where
    M: Middleware + 'static,
{
    async fn estimate_fees(&self, config: &FeeConfig) -> PushResult<FeeEstimate> {
        match config {
            FeeConfig::Eip1559 {
                percentile,
                historical_blocks,
                ..
            } => self.estimate_eip1559(*percentile, *historical_blocks).await,
            FeeConfig::Legacy { .. } => {
                let gas_price = self.provider.get_gas_price().await.map_err(PushError::rpc)?;
                Ok(FeeEstimate::Legacy { gas_price })
            }
        }
    }

    async fn estimate_gas(&self, call: &UpdateCall) -> PushResult<U256> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.sender)
            .to(call.target)
            .data(call.data.clone())
            .into();
        self.provider
            .estimate_gas(&tx, None)
            .await
            .map_err(classify_send_error)
    }

    async fn estimate_l1_fee(
        &self,
        call: &UpdateCall,
        fees: &TxFees,
        gas_limit: U256,
    ) -> PushResult<Option<U256>> {
        let Some(oracle) = self.l1_fee_oracle else {
            return Ok(None);
        };
        // quoted on the unsigned payload, nonce left at zero
        let tx = self.build_tx(call, fees, gas_limit, U256::zero());
        let fee = GasPriceOracle::new(oracle, self.provider.clone())
            .get_l1_fee(tx.rlp())
            .call()
            .await
            .map_err(PushError::rpc)?;
        Ok(Some(fee))
    }

    #[instrument(level = "debug", skip(self, call), fields(to = ?call.target, data = %short_hex(&call.data)))]
    async fn send(
        &self,
        call: &UpdateCall,
        fees: &TxFees,
        gas_limit: U256,
        nonce: Option<U256>,
    ) -> PushResult<SentTransaction> {
        let mut last_nonce = self.last_nonce.lock().await;
        let nonce = match nonce {
            Some(nonce) => nonce,
            None => {
                let pending_count = self
                    .provider
                    .get_transaction_count(self.sender, Some(BlockNumber::Pending.into()))
                    .await
                    .map_err(PushError::rpc)?;
                next_nonce(pending_count, *last_nonce)
            }
        };
        let tx = self.build_tx(call, fees, gas_limit, nonce);

        let pending = self
            .provider
            .send_transaction(tx, None)
            .await
            .map_err(|err| {
                let err = classify_send_error(err);
                warn!(?err, %nonce, "Transaction rejected");
                err
            })?;
        let hash = pending.tx_hash();
        *last_nonce = Some(last_nonce.map_or(nonce, |last| last.max(nonce)));
        info!(tx_hash = ?hash, %nonce, "Dispatched tx");
        Ok(SentTransaction::new(hash, nonce))
    }

    async fn receipt(&self, hash: H256) -> PushResult<Option<TxReceipt>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(PushError::rpc)?;
        // a receipt without a block number is not mined yet
        Ok(receipt.and_then(|receipt| {
            let block_number = receipt.block_number?.as_u64();
            let success = receipt.status == Some(U64::one());
            Some(TxReceipt::new(block_number, success))
        }))
    }

    async fn block_number(&self) -> PushResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(PushError::rpc)
    }
}
