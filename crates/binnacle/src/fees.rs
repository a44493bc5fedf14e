use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeePriority {
    Slow,
    Normal,
    Fast,
}

impl FeePriority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "slow" => Some(Self::Slow),
            "normal" => Some(Self::Normal),
            "fast" => Some(Self::Fast),
            _ => None,
        }
    }
}

/// Bitcoin confirmation target per priority, in blocks.
pub const fn bitcoin_target_blocks(priority: FeePriority) -> u16 {
    match priority {
        FeePriority::Slow => 144,
        FeePriority::Normal => 6,
        FeePriority::Fast => 2,
    }
}

/// Static sat/vB fallback when the fee-rate table has no entry for a target.
/// Fee estimation degrades, it never blocks a send.
pub const fn bitcoin_fallback_rate(target_blocks: u16) -> u64 {
    match target_blocks {
        0..=2 => 10,
        3..=12 => 5,
        _ => 1,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BitcoinFeeQuote {
    pub target_blocks: u16,
    pub fee_rate_sat_vb: u64,
    pub total_sats: u64,
}

/// Transaction weight model: overhead 10 bytes, 148 per input, 34 per
/// output. Total fee is the estimated size times the per-byte rate.
pub const fn bitcoin_tx_size_bytes(inputs: usize, outputs: usize) -> u64 {
    10 + 148 * (inputs as u64) + 34 * (outputs as u64)
}

pub fn estimate_bitcoin_fee(
    priority: FeePriority,
    inputs: usize,
    outputs: usize,
    rate_table: &BTreeMap<u16, f64>,
) -> BitcoinFeeQuote {
    let target = bitcoin_target_blocks(priority);
    let fee_rate_sat_vb = rate_table
        .get(&target)
        .map(|r| clamp_rate(*r))
        .unwrap_or_else(|| bitcoin_fallback_rate(target));
    BitcoinFeeQuote {
        target_blocks: target,
        fee_rate_sat_vb,
        total_sats: bitcoin_tx_size_bytes(inputs, outputs).saturating_mul(fee_rate_sat_vb),
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "rate is clamped non-negative and far below u64::MAX before the cast"
)]
fn clamp_rate(rate: f64) -> u64 {
    let r = rate.ceil();
    if r.is_finite() && r >= 1.0 {
        r.min(10_000.0) as u64
    } else {
        1
    }
}

/// Externally supplied gas-price tiers, in Gwei.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasTiers {
    pub safe_gwei: u64,
    pub propose_gwei: u64,
    pub fast_gwei: u64,
}

/// Static fallback tiers when the oracle is unreachable.
pub const FALLBACK_GAS_TIERS: GasTiers = GasTiers {
    safe_gwei: 10,
    propose_gwei: 20,
    fast_gwei: 30,
};

pub const GAS_LIMIT_NATIVE_TRANSFER: u64 = 21_000;
/// Base ERC-20 transfer estimate plus a safety margin; no live simulation.
pub const GAS_LIMIT_TOKEN_BASE: u64 = 65_000;
pub const GAS_LIMIT_TOKEN_MARGIN: u64 = 13_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmOperation {
    NativeTransfer,
    TokenTransfer,
}

impl EvmOperation {
    pub const fn gas_limit(self) -> u64 {
        match self {
            Self::NativeTransfer => GAS_LIMIT_NATIVE_TRANSFER,
            Self::TokenTransfer => GAS_LIMIT_TOKEN_BASE + GAS_LIMIT_TOKEN_MARGIN,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvmFeeQuote {
    pub gas_price_wei: u128,
    pub gas_limit: u64,
    pub total_wei: u128,
}

pub fn estimate_evm_fee(priority: FeePriority, tiers: GasTiers, op: EvmOperation) -> EvmFeeQuote {
    let gwei = match priority {
        FeePriority::Slow => tiers.safe_gwei,
        FeePriority::Normal => tiers.propose_gwei,
        FeePriority::Fast => tiers.fast_gwei,
    };
    let gas_price_wei = u128::from(gwei) * 1_000_000_000;
    let gas_limit = op.gas_limit();
    EvmFeeQuote {
        gas_price_wei,
        gas_limit,
        total_wei: gas_price_wei * u128::from(gas_limit),
    }
}

/// Flat per-signature network fee on the account chain.
pub const SOLANA_BASE_FEE_LAMPORTS: u64 = 5_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolanaFeeQuote {
    pub lamports: u64,
}

/// The account chain charges a fixed fee today; the priority argument is
/// accepted for forward compatibility but does not change the quote.
pub const fn estimate_solana_fee(_priority: FeePriority) -> SolanaFeeQuote {
    SolanaFeeQuote {
        lamports: SOLANA_BASE_FEE_LAMPORTS,
    }
}
