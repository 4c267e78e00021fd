use std::time::Duration;

use eyre::{bail, eyre, Result};
use feedpush_core::{Address, FeeConfig, Multiplier, SteppedMultiplier, U256};
use serde::Deserialize;

use super::FromRawConf;

/// Flat amount added to every gas estimate.
pub const GAS_ESTIMATE_BUFFER: u64 = 75_000;

/// How the gas limit of an update transaction is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLimit {
    /// Always the same limit
    Fixed(U256),
    /// Node estimate plus [`GAS_ESTIMATE_BUFFER`]
    Estimate,
}

impl GasLimit {
    /// Limit to use given a raw node estimate.
    pub fn with_estimate(estimate: U256) -> U256 {
        estimate.saturating_add(U256::from(GAS_ESTIMATE_BUFFER))
    }
}

/// Transaction submission settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConf {
    /// Bound on a whole submission attempt, replacements included
    pub transaction_timeout: Duration,
    /// Bound on waiting for one transaction to confirm
    pub confirmation_timeout: Duration,
    /// Gas limit policy
    pub gas_limit: GasLimit,
    /// Fee market settings
    pub fees: FeeConfig,
    /// OP stack `GasPriceOracle` quoting the L1 data fee of transactions
    pub op_gas_price_oracle: Option<Address>,
}

/// Raw version of [`TransactionConf`]
#[derive(Debug, Deserialize)]
pub struct RawTransactionConf {
    transaction_timeout_ms: u64,
    confirmation_timeout_ms: u64,
    gas_limit: Option<u64>,
    #[serde(default = "default_tx_type")]
    tx_type: u8,
    eip1559: Option<RawEip1559Conf>,
    gas_price_multiplier: Option<SteppedMultiplier>,
    op_gas_price_oracle: Option<String>,
}

fn default_tx_type() -> u8 {
    2
}

#[derive(Debug, Deserialize)]
struct RawEip1559Conf {
    percentile: u8,
    historical_blocks: u64,
    base_fee_multiplier: Multiplier,
    priority_fee_multiplier: SteppedMultiplier,
    #[serde(default)]
    min_priority_fee: u64,
}

impl FromRawConf<RawTransactionConf> for TransactionConf {
    fn from_raw_conf(raw: RawTransactionConf) -> Result<Self> {
        if raw.transaction_timeout_ms == 0 || raw.confirmation_timeout_ms == 0 {
            bail!("tx: timeouts must be positive");
        }
        if raw.confirmation_timeout_ms > raw.transaction_timeout_ms {
            bail!(
                "tx.confirmation_timeout_ms: {} exceeds tx.transaction_timeout_ms {}",
                raw.confirmation_timeout_ms,
                raw.transaction_timeout_ms
            );
        }

        let fees = match raw.tx_type {
            2 => {
                let eip1559 = raw
                    .eip1559
                    .ok_or_else(|| eyre!("tx.eip1559: required for tx_type 2"))?;
                if eip1559.percentile > 100 {
                    bail!("tx.eip1559.percentile: {} is above 100", eip1559.percentile);
                }
                if eip1559.historical_blocks == 0 {
                    bail!("tx.eip1559.historical_blocks: must be positive");
                }
                if eip1559.priority_fee_multiplier.divisor == 0 {
                    bail!("tx.eip1559.priority_fee_multiplier: zero divisor");
                }
                FeeConfig::Eip1559 {
                    percentile: eip1559.percentile,
                    historical_blocks: eip1559.historical_blocks,
                    base_fee_multiplier: eip1559.base_fee_multiplier,
                    priority_fee_multiplier: eip1559.priority_fee_multiplier,
                    min_priority_fee: eip1559.min_priority_fee,
                }
            }
            0 => {
                let gas_price_multiplier = raw.gas_price_multiplier.unwrap_or(
                    SteppedMultiplier::flat(Multiplier::ONE),
                );
                if gas_price_multiplier.divisor == 0 {
                    bail!("tx.gas_price_multiplier: zero divisor");
                }
                FeeConfig::Legacy {
                    gas_price_multiplier,
                }
            }
            other => bail!("tx.tx_type: unsupported transaction type {other}, expected 0 or 2"),
        };

        let op_gas_price_oracle = raw
            .op_gas_price_oracle
            .as_deref()
            .map(|oracle| {
                oracle
                    .parse::<Address>()
                    .map_err(|err| eyre!("tx.op_gas_price_oracle: invalid address {oracle:?}: {err}"))
            })
            .transpose()?;

        Ok(Self {
            transaction_timeout: Duration::from_millis(raw.transaction_timeout_ms),
            confirmation_timeout: Duration::from_millis(raw.confirmation_timeout_ms),
            gas_limit: match raw.gas_limit {
                Some(limit) if limit > 0 => GasLimit::Fixed(U256::from(limit)),
                _ => GasLimit::Estimate,
            },
            fees,
            op_gas_price_oracle,
        })
    }
}
