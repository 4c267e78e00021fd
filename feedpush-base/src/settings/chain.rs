use std::fmt::{Debug, Formatter};
use std::time::Duration;

use eyre::{eyre, Context, Result};
use feedpush_core::Address;
use serde::Deserialize;
use url::Url;

use super::FromRawConf;

/// The canonical Multicall3 deployment, present at the same address on most
/// EVM chains.
pub const DEFAULT_MULTICALL_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// Hex encoded private key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SignerKey(String);

impl SignerKey {
    /// The key as configured
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for SignerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignerKey(<redacted>)")
    }
}

/// The chain the feeds are pushed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConf {
    /// Name used in logs and metrics
    pub name: String,
    /// EIP-155 chain id
    pub chain_id: u64,
    /// JSON-RPC endpoint
    pub rpc_url: Url,
    /// Key signing update transactions
    pub signer_key: SignerKey,
    /// Multicall contract used to batch reads
    pub multicall_address: Address,
    /// Expected block interval
    pub block_time: Duration,
    /// Pinged after successful on-chain reads
    pub uptime_webhook_url: Option<Url>,
}

/// Raw version of [`ChainConf`]
#[derive(Debug, Deserialize)]
pub struct RawChainConf {
    name: String,
    chain_id: u64,
    rpc_url: String,
    signer_key: String,
    multicall_address: Option<String>,
    block_time_ms: Option<u64>,
    uptime_webhook_url: Option<String>,
}

impl FromRawConf<RawChainConf> for ChainConf {
    fn from_raw_conf(raw: RawChainConf) -> Result<Self> {
        let rpc_url = raw
            .rpc_url
            .parse()
            .with_context(|| format!("chain.rpc_url: invalid url {:?}", raw.rpc_url))?;

        let key = raw.signer_key.trim();
        let stripped = key.strip_prefix("0x").unwrap_or(key);
        if !matches!(hex::decode(stripped), Ok(bytes) if bytes.len() == 32) {
            return Err(eyre!("chain.signer_key: expected 32 hex encoded bytes"));
        }

        let multicall = raw
            .multicall_address
            .as_deref()
            .unwrap_or(DEFAULT_MULTICALL_ADDRESS);
        let multicall_address = multicall
            .parse()
            .map_err(|err| eyre!("chain.multicall_address: invalid address {multicall:?}: {err}"))?;

        let uptime_webhook_url = raw
            .uptime_webhook_url
            .filter(|url| !url.is_empty())
            .map(|url| {
                url.parse()
                    .with_context(|| format!("chain.uptime_webhook_url: invalid url {url:?}"))
            })
            .transpose()?;

        Ok(Self {
            name: raw.name,
            chain_id: raw.chain_id,
            rpc_url,
            signer_key: SignerKey(stripped.to_owned()),
            multicall_address,
            block_time: Duration::from_millis(raw.block_time_ms.unwrap_or(2_000)),
            uptime_webhook_url,
        })
    }
}
