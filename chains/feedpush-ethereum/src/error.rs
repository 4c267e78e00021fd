use feedpush_core::{FeedId, PushError};

/// Errors specific to EVM chains, converted into [`PushError`] at the trait
/// boundary.
#[derive(Debug, thiserror::Error)]
pub enum EthereumError {
    /// The node returned an empty fee history
    #[error("Empty fee history over the last {0} blocks")]
    EmptyFeeHistory(u64),
    /// The provider has no signer attached
    #[error("Provider has no default sender")]
    NoSender,
    /// An on-chain value does not fit the record type
    #[error("On-chain value of feed {0} is out of range")]
    ValueOutOfRange(FeedId),
    /// A multicall answer did not decode
    #[error("Malformed multicall result for feed {feed}: {reason}")]
    MalformedResult {
        /// Feed read
        feed: FeedId,
        /// Decoder error
        reason: String,
    },
    /// The signer key did not parse
    #[error("Invalid signer key: {0}")]
    InvalidSigner(String),
}

impl From<EthereumError> for PushError {
    fn from(err: EthereumError) -> Self {
        match err {
            EthereumError::InvalidSigner(msg) => PushError::Config(msg),
            other => PushError::rpc(other),
        }
    }
}
