use thiserror::Error;

/// Domain errors surfaced by the wallet core.
///
/// Every variant carries a human-readable message; transaction records remain
/// the durable account of what happened regardless of which variant aborted a
/// flow.
#[derive(Debug, Error, Clone)]
pub enum WalletError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient funds: have {available} base units, need {required}")]
    InsufficientFunds { available: u128, required: u128 },

    #[error("no spendable outputs for this address")]
    NoUtxo,

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("no {coin} coin recorded for wallet {wallet}")]
    CoinNotFound { wallet: String, coin: String },

    #[error("no stored key for wallet {wallet} ({secret_type})")]
    KeyNotFound { wallet: String, secret_type: String },

    #[error("derived signer address {derived} does not match recorded coin address {expected}")]
    AddressMismatch { expected: String, derived: String },

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("network collaborator unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("broadcast rejected by the network: {0}")]
    BroadcastRejected(String),

    #[error("invalid private key material")]
    InvalidKey,

    #[error("unsupported network for this asset: {0}")]
    UnsupportedNetwork(String),

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("transaction {id} is not in a {expected} state")]
    InvalidTransition { id: String, expected: String },

    #[error("wallet store busy; retry the operation")]
    StoreBusy,

    #[error("backup not confirmed")]
    BackupNotConfirmed,

    #[error("secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),
}

impl WalletError {
    /// Stable machine-readable code for logs and CLI output.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::NoUtxo => "no_utxo",
            Self::WalletNotFound(_) => "wallet_not_found",
            Self::CoinNotFound { .. } => "coin_not_found",
            Self::KeyNotFound { .. } => "key_not_found",
            Self::AddressMismatch { .. } => "address_mismatch",
            Self::AuthenticationRequired => "authentication_required",
            Self::NetworkUnavailable(_) => "network_unavailable",
            Self::SigningFailed(_) => "signing_failed",
            Self::BroadcastRejected(_) => "broadcast_rejected",
            Self::InvalidKey => "invalid_key",
            Self::UnsupportedNetwork(_) => "unsupported_network",
            Self::TransactionNotFound(_) => "transaction_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::StoreBusy => "store_busy",
            Self::BackupNotConfirmed => "backup_not_confirmed",
            Self::SecureStorageUnavailable(_) => "secure_storage_unavailable",
        }
    }

    /// Whether a caller may reasonably retry the same operation unchanged.
    ///
    /// Mismatched keys and failed signature verification are never retryable;
    /// they indicate wrong key material, not transient conditions.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_) | Self::StoreBusy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            WalletError::AuthenticationRequired.code(),
            "authentication_required"
        );
        assert_eq!(
            WalletError::AddressMismatch {
                expected: "a".into(),
                derived: "b".into()
            }
            .code(),
            "address_mismatch"
        );
    }

    #[test]
    fn retryability_excludes_signing_failures() {
        assert!(WalletError::NetworkUnavailable("timeout".into()).is_retryable());
        assert!(!WalletError::SigningFailed("verify".into()).is_retryable());
        assert!(!WalletError::AddressMismatch {
            expected: "a".into(),
            derived: "b".into()
        }
        .is_retryable());
    }
}
