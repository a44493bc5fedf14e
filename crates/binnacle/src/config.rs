use crate::chains::{BitcoinNetwork, EvmNetwork, SolanaNetwork};
use serde::{Deserialize, Serialize};

pub const SOLANA_MAINNET_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const SOLANA_DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";

pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Testnet,
}

impl NetworkMode {
    pub const fn bitcoin(self) -> BitcoinNetwork {
        match self {
            Self::Mainnet => BitcoinNetwork::Mainnet,
            Self::Testnet => BitcoinNetwork::Testnet,
        }
    }

    pub const fn evm(self) -> EvmNetwork {
        match self {
            Self::Mainnet => EvmNetwork::Mainnet,
            Self::Testnet => EvmNetwork::Sepolia,
        }
    }

    pub const fn solana(self) -> SolanaNetwork {
        match self {
            Self::Mainnet => SolanaNetwork::MainnetBeta,
            Self::Testnet => SolanaNetwork::Devnet,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub evm_rpc_url_mainnet: String,
    pub evm_rpc_url_sepolia: String,
    pub evm_fallback_rpc_urls: Vec<String>,
    pub solana_rpc_url_mainnet: String,
    pub solana_rpc_url_devnet: String,
    pub solana_fallback_rpc_urls: Vec<String>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            evm_rpc_url_mainnet: "https://eth.llamarpc.com".into(),
            evm_rpc_url_sepolia: "https://ethereum-sepolia-rpc.publicnode.com".into(),
            evm_fallback_rpc_urls: vec![],
            solana_rpc_url_mainnet: SOLANA_MAINNET_RPC_URL.into(),
            solana_rpc_url_devnet: SOLANA_DEVNET_RPC_URL.into(),
            solana_fallback_rpc_urls: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bitcoin HTTP API base URL (mainnet). Blockstream-compatible
    /// endpoints (address/utxo/fee-estimates/tx).
    pub bitcoin_api_base_url_mainnet: String,
    /// Bitcoin HTTP API base URL (testnet).
    pub bitcoin_api_base_url_testnet: String,
    /// Etherscan-style gas oracle base URL (safe/propose/fast tiers).
    pub gas_oracle_base_url: String,
    /// Optional gas oracle API key.
    pub gas_oracle_api_key: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bitcoin_api_base_url_mainnet: "https://blockstream.info/api".into(),
            bitcoin_api_base_url_testnet: "https://blockstream.info/testnet/api".into(),
            gas_oracle_base_url: "https://api.etherscan.io/api".into(),
            gas_oracle_api_key: None,
        }
    }
}

/// Session-gate settings. `pin_hash` is `hex(sha256(pin || salt)) ":" hex(salt)`
/// (the PIN itself is never persisted).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub session_timeout_secs: u64,
    pub pin_hash: Option<String>,
    pub biometric_enrolled: bool,
    pub biometric_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            pin_hash: None,
            biometric_enrolled: false,
            biometric_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BinnacleConfig {
    pub network_mode: NetworkMode,
    pub rpc: RpcConfig,
    pub http: HttpConfig,
    pub security: SecurityConfig,
}

impl BinnacleConfig {
    pub fn evm_rpc_url(&self) -> &str {
        match self.network_mode.evm() {
            EvmNetwork::Mainnet => &self.rpc.evm_rpc_url_mainnet,
            EvmNetwork::Sepolia => &self.rpc.evm_rpc_url_sepolia,
        }
    }

    pub fn solana_rpc_url(&self) -> &str {
        match self.network_mode.solana() {
            SolanaNetwork::MainnetBeta => &self.rpc.solana_rpc_url_mainnet,
            SolanaNetwork::Devnet => &self.rpc.solana_rpc_url_devnet,
        }
    }

    pub fn bitcoin_api_base_url(&self) -> &str {
        match self.network_mode.bitcoin() {
            BitcoinNetwork::Mainnet => &self.http.bitcoin_api_base_url_mainnet,
            BitcoinNetwork::Testnet => &self.http.bitcoin_api_base_url_testnet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serialize_roundtrip() -> eyre::Result<()> {
        let cfg = BinnacleConfig::default();
        let s = toml::to_string_pretty(&cfg)?;
        let back: BinnacleConfig = toml::from_str(&s)?;
        assert_eq!(back.security.session_timeout_secs, DEFAULT_SESSION_TIMEOUT_SECS);
        assert_eq!(back.network_mode, NetworkMode::Mainnet);
        Ok(())
    }

    #[test]
    fn network_mode_selects_per_chain_networks() {
        let m = NetworkMode::Testnet;
        assert_eq!(m.bitcoin(), BitcoinNetwork::Testnet);
        assert_eq!(m.evm(), EvmNetwork::Sepolia);
        assert_eq!(m.solana(), SolanaNetwork::Devnet);
    }
}
