use std::error::Error as StdError;
use std::fmt::{Debug, Display, Formatter};

use crate::{FeedId, H256};

/// The result of any fallible feedpush operation.
pub type PushResult<T> = Result<T, PushError>;

/// Thin wrapper around a boxed error coming from a collaborator (RPC client,
/// HTTP client, signer). Keeps `PushError` free of client-specific types.
pub struct BoxedError(Box<dyn StdError + Send + Sync + 'static>);

impl Debug for BoxedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Display for BoxedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for BoxedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Everything that can go wrong while deciding on, building or landing a feed
/// update.
///
/// None of these are fatal to a worker: every variant degrades to "try again
/// next tick".
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// Not enough recent samples to estimate the clock skew. Callers fall back
    /// to a zero offset.
    #[error("Insufficient data: {available} usable records, {required} required")]
    InsufficientData {
        /// Records left after age and count filtering
        available: usize,
        /// Configured minimum
        required: usize,
    },
    /// A cached on-chain record was missing or expired and must be re-read.
    #[error("Stale cache entry for feed {0}")]
    StaleCache(FeedId),
    /// A submitted transaction did not confirm in time.
    #[error("Transaction {0:?} timed out waiting for confirmation")]
    TransactionTimedOut(H256),
    /// A submitted transaction was mined but reverted.
    #[error("Transaction {0:?} reverted")]
    TransactionReverted(H256),
    /// The node or signer rejected the transaction before it was mined.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    /// The chain RPC could not be reached or answered with an error.
    #[error("RPC unavailable: {0}")]
    RpcUnavailable(#[source] BoxedError),
    /// The upstream price source could not be reached or answered badly.
    #[error("Price source error: {0}")]
    Source(#[source] BoxedError),
    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PushError {
    /// Wrap any RPC client error
    pub fn rpc<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::RpcUnavailable(BoxedError(Box::new(err)))
    }

    /// Wrap any price source client error
    pub fn upstream<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Source(BoxedError(Box::new(err)))
    }

    /// Whether the operation may succeed if tried again on a later tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            PushError::InsufficientData { .. }
            | PushError::StaleCache(_)
            | PushError::TransactionTimedOut(_)
            | PushError::TransactionReverted(_)
            | PushError::TransactionFailed(_)
            | PushError::RpcUnavailable(_)
            | PushError::Source(_) => true,
            // a bad config value does not heal itself, but a worker still
            // keeps running and reports it every tick
            PushError::Config(_) => true,
        }
    }

    /// Short label used for metrics
    pub fn metrics_label(&self) -> &'static str {
        match self {
            PushError::InsufficientData { .. } => "insufficient_data",
            PushError::StaleCache(_) => "stale_cache",
            PushError::TransactionTimedOut(_) => "timed_out",
            PushError::TransactionReverted(_) => "reverted",
            PushError::TransactionFailed(_) => "failed",
            PushError::RpcUnavailable(_) => "rpc_unavailable",
            PushError::Source(_) => "source",
            PushError::Config(_) => "config",
        }
    }
}
