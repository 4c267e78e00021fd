use std::sync::Arc;
use std::time::Duration;

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use feedpush_core::{PushError, PushResult};
use url::Url;

use crate::EthereumError;

/// Provider signing with a local key.
pub type SigningProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Http provider for `rpc_url` signing with `signer_key` (64 hex characters)
/// for `chain_id`.
///
/// `poll_interval` is how often the provider polls for new blocks or pending
/// transactions; half the block time is a good value.
pub fn build_signing_provider(
    rpc_url: &Url,
    signer_key: &str,
    chain_id: u64,
    poll_interval: Duration,
) -> PushResult<Arc<SigningProvider>> {
    let provider = Provider::new(Http::new(rpc_url.clone())).interval(poll_interval);
    let wallet = signer_key
        .parse::<LocalWallet>()
        .map_err(|err| EthereumError::InvalidSigner(err.to_string()))?
        .with_chain_id(chain_id);
    Ok(Arc::new(SignerMiddleware::new(provider, wallet)))
}

/// Address signing with `signer_key`
pub fn signer_address(signer_key: &str) -> PushResult<feedpush_core::Address> {
    signer_key
        .parse::<LocalWallet>()
        .map(|wallet| wallet.address())
        .map_err(|err| PushError::from(EthereumError::InvalidSigner(err.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    // first default anvil account
    const KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn derives_the_signer_address() {
        assert_eq!(
            signer_address(KEY).unwrap(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap()
        );
    }

    #[test]
    fn rejects_bad_keys() {
        let url: Url = "http://localhost:8545".parse().unwrap();
        assert!(matches!(
            build_signing_provider(&url, "zz", 480, Duration::from_secs(1)),
            Err(PushError::Config(_))
        ));
    }
}
