use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Multiplier, PushResult, SteppedMultiplier, WorkerTier, U256};

const ESCALATION_MULTIPLIER_NUMERATOR: u32 = 110;
const ESCALATION_MULTIPLIER_DENOMINATOR: u32 = 100;
const FEE_CAP_MULTIPLIER: u32 = 3;

/// Fee market settings, shared by every tier of a deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeConfig {
    /// Type 2 transactions
    Eip1559 {
        /// Percentile of base fees and rewards sampled from recent blocks
        percentile: u8,
        /// Number of recent blocks sampled
        historical_blocks: u64,
        /// Applied to the sampled base fee, same for every tier
        base_fee_multiplier: Multiplier,
        /// Applied to the sampled priority fee, grows with the tier
        priority_fee_multiplier: SteppedMultiplier,
        /// Floor of the sampled priority fee, in wei
        min_priority_fee: u64,
    },
    /// Type 0 transactions
    Legacy {
        /// Applied to the node's gas price estimate, grows with the tier
        gas_price_multiplier: SteppedMultiplier,
    },
}

/// Multipliers resolved for a single tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeMultipliers {
    /// Base fee multiplier. [`Multiplier::ONE`] for legacy transactions.
    pub base_fee: Multiplier,
    /// Priority fee multiplier, or the gas price multiplier for legacy
    /// transactions.
    pub priority_fee: Multiplier,
}

/// Raw fee values sampled from the chain, before any tier multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeeEstimate {
    /// Sampled from fee history
    Eip1559 {
        /// Percentile base fee
        base_fee: U256,
        /// Percentile reward, not yet floored
        priority_fee: U256,
    },
    /// Node gas price estimate
    Legacy {
        /// Gas price
        gas_price: U256,
    },
}

/// Fee fields set on a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxFees {
    /// Type 2 fields
    Eip1559 {
        /// `maxFeePerGas`
        max_fee_per_gas: U256,
        /// `maxPriorityFeePerGas`
        max_priority_fee_per_gas: U256,
    },
    /// Type 0 field
    Legacy {
        /// `gasPrice`
        gas_price: U256,
    },
}

impl TxFees {
    /// Upper bound paid per gas unit
    pub fn max_fee(&self) -> U256 {
        match self {
            TxFees::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
            TxFees::Legacy { gas_price } => *gas_price,
        }
    }

    /// Tip paid per gas unit; the full gas price for legacy transactions
    pub fn priority_fee(&self) -> U256 {
        match self {
            TxFees::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => *max_priority_fee_per_gas,
            TxFees::Legacy { gas_price } => *gas_price,
        }
    }
}

impl FeeConfig {
    /// Multipliers of `tier`. The base fee multiplier never depends on the
    /// tier; the priority multiplier is non-decreasing in it.
    pub fn multipliers(&self, tier: WorkerTier) -> PushResult<FeeMultipliers> {
        match self {
            FeeConfig::Eip1559 {
                base_fee_multiplier,
                priority_fee_multiplier,
                ..
            } => Ok(FeeMultipliers {
                base_fee: *base_fee_multiplier,
                priority_fee: priority_fee_multiplier.for_tier(tier)?,
            }),
            FeeConfig::Legacy {
                gas_price_multiplier,
            } => Ok(FeeMultipliers {
                base_fee: Multiplier::ONE,
                priority_fee: gas_price_multiplier.for_tier(tier)?,
            }),
        }
    }

    /// Priority fee floor, zero for legacy transactions.
    pub fn min_priority_fee(&self) -> U256 {
        match self {
            FeeConfig::Eip1559 {
                min_priority_fee, ..
            } => U256::from(*min_priority_fee),
            FeeConfig::Legacy { .. } => U256::zero(),
        }
    }

    /// Turn sampled values into transaction fee fields for the tier whose
    /// multipliers are given.
    ///
    /// `max_fee = base * base_multiplier + max(reward, min_priority_fee) * priority_multiplier`
    pub fn resolve(&self, estimate: FeeEstimate, multipliers: &FeeMultipliers) -> TxFees {
        match estimate {
            FeeEstimate::Eip1559 {
                base_fee,
                priority_fee,
            } => {
                let floored = priority_fee.max(self.min_priority_fee());
                let max_priority_fee_per_gas = multipliers.priority_fee.apply(floored);
                let max_fee_per_gas = multipliers
                    .base_fee
                    .apply(base_fee)
                    .saturating_add(max_priority_fee_per_gas);
                TxFees::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                }
            }
            FeeEstimate::Legacy { gas_price } => TxFees::Legacy {
                gas_price: multipliers.priority_fee.apply(gas_price),
            },
        }
    }
}

/// Fees for a replacement of a transaction sent with `old`, given freshly
/// resolved `new` fees. Each field becomes
/// `min(max(1.1 * old, new), 3 * new)` so the mempool accepts the replacement
/// without fees running away.
///
/// Returns `new` untouched if the transaction types differ.
pub fn escalate(old: &TxFees, new: &TxFees) -> TxFees {
    let escalated = match (old, new) {
        (
            TxFees::Eip1559 {
                max_fee_per_gas: old_max_fee,
                max_priority_fee_per_gas: old_priority_fee,
            },
            TxFees::Eip1559 {
                max_fee_per_gas: new_max_fee,
                max_priority_fee_per_gas: new_priority_fee,
            },
        ) => TxFees::Eip1559 {
            max_fee_per_gas: escalate_value(*old_max_fee, *new_max_fee),
            max_priority_fee_per_gas: escalate_value(*old_priority_fee, *new_priority_fee),
        },
        (
            TxFees::Legacy {
                gas_price: old_gas_price,
            },
            TxFees::Legacy {
                gas_price: new_gas_price,
            },
        ) => TxFees::Legacy {
            gas_price: escalate_value(*old_gas_price, *new_gas_price),
        },
        _ => *new,
    };
    debug!(?old, ?new, ?escalated, "Escalated transaction fees");
    escalated
}

fn escalate_value(old: U256, new: U256) -> U256 {
    let bumped = old.saturating_mul(U256::from(ESCALATION_MULTIPLIER_NUMERATOR))
        / U256::from(ESCALATION_MULTIPLIER_DENOMINATOR);
    let cap = new.saturating_mul(U256::from(FEE_CAP_MULTIPLIER));
    bumped.max(new).min(cap)
}
