use async_trait::async_trait;
use feedpush_core::{
    FeeConfig, FeeEstimate, FeedId, FeedReader, FeedRecord, PushResult, SentTransaction, TxFees,
    TxReceipt, UpdateCall, UpdateSubmitter, H256, U256,
};

mockall::mock! {
    pub Submitter {}

    #[async_trait]
    impl UpdateSubmitter for Submitter {
        async fn estimate_fees(&self, config: &FeeConfig) -> PushResult<FeeEstimate>;
        async fn estimate_gas(&self, call: &UpdateCall) -> PushResult<U256>;
        async fn send(
            &self,
            call: &UpdateCall,
            fees: &TxFees,
            gas_limit: U256,
            nonce: Option<U256>,
        ) -> PushResult<SentTransaction>;
        async fn receipt(&self, hash: H256) -> PushResult<Option<TxReceipt>>;
        async fn block_number(&self) -> PushResult<u64>;
    }
}

mockall::mock! {
    pub Reader {}

    #[async_trait]
    impl FeedReader for Reader {
        async fn read_records(&self, feeds: &[FeedId]) -> PushResult<Vec<FeedRecord>>;
    }
}

impl std::fmt::Debug for MockSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSubmitter").finish()
    }
}

impl std::fmt::Debug for MockReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockReader").finish()
    }
}

/// Fee history sample used across tests: 1000 wei base fee, 10 wei reward.
pub fn estimate() -> FeeEstimate {
    FeeEstimate::Eip1559 {
        base_fee: U256::from(1_000u64),
        priority_fee: U256::from(10u64),
    }
}
