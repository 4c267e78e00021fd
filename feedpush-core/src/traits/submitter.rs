use std::fmt::Debug;

use async_trait::async_trait;
use auto_impl::auto_impl;
use derive_new::new;

use crate::{Address, Bytes, FeeConfig, FeeEstimate, PushResult, TxFees, H256, U256};

/// A contract call carrying a batch of updates.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct UpdateCall {
    /// Contract address
    pub target: Address,
    /// Selector followed by the abi encoded arguments
    pub data: Bytes,
}

/// A transaction accepted by the node.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SentTransaction {
    /// Transaction hash
    pub hash: H256,
    /// Nonce it was sent with, reused when it gets replaced
    pub nonce: U256,
}

/// The part of a receipt the tracker cares about.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    /// Block the transaction was included in
    pub block_number: u64,
    /// Whether execution succeeded
    pub success: bool,
}

/// Signs, sends and follows update transactions.
#[async_trait]
#[auto_impl(&, Box, Arc)]
pub trait UpdateSubmitter: Send + Sync + Debug {
    /// Sample current fees the way `config` asks for, before any tier
    /// multiplier.
    async fn estimate_fees(&self, config: &FeeConfig) -> PushResult<FeeEstimate>;

    /// Gas estimate of `call`, without any buffer.
    async fn estimate_gas(&self, call: &UpdateCall) -> PushResult<U256>;

    /// L1 data fee the transaction would pay on top of its execution fees,
    /// `None` on chains without one.
    async fn estimate_l1_fee(
        &self,
        _call: &UpdateCall,
        _fees: &TxFees,
        _gas_limit: U256,
    ) -> PushResult<Option<U256>> {
        Ok(None)
    }

    /// Sign and send `call`. With `nonce` set, the transaction replaces the
    /// one previously sent with that nonce.
    async fn send(
        &self,
        call: &UpdateCall,
        fees: &TxFees,
        gas_limit: U256,
        nonce: Option<U256>,
    ) -> PushResult<SentTransaction>;

    /// Receipt of `hash`, `None` while it is not included.
    async fn receipt(&self, hash: H256) -> PushResult<Option<TxReceipt>>;

    /// Current block height
    async fn block_number(&self) -> PushResult<u64>;
}
