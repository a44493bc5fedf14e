pub mod bitcoin;
pub mod evm;
pub mod solana;

use serde::{Deserialize, Serialize};

/// Supported chains. Closed set; every match over this enum is exhaustive on
/// purpose so adding a chain forces a review of each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    Evm,
    Solana,
}

impl Chain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Evm => "evm",
            Self::Solana => "solana",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BitcoinNetwork {
    #[default]
    Mainnet,
    Testnet,
}

impl BitcoinNetwork {
    pub const fn to_lib(self) -> ::bitcoin::Network {
        match self {
            Self::Mainnet => ::bitcoin::Network::Bitcoin,
            Self::Testnet => ::bitcoin::Network::Testnet,
        }
    }

    /// BIP-44/84 coin type for derivation paths.
    pub const fn coin_type(self) -> u32 {
        match self {
            Self::Mainnet => 0,
            Self::Testnet => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvmNetwork {
    #[default]
    Mainnet,
    Sepolia,
}

impl EvmNetwork {
    pub const fn chain_id(self) -> u64 {
        match self {
            Self::Mainnet => 1,
            Self::Sepolia => 11_155_111,
        }
    }

    /// Canonical USDC contract for this network, if deployed.
    pub const fn usdc_contract(self) -> Option<&'static str> {
        match self {
            Self::Mainnet => Some("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
            Self::Sepolia => Some("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SolanaNetwork {
    #[default]
    MainnetBeta,
    Devnet,
}

/// One spendable asset a wallet tracks. Bitcoin/Ethereum/Solana are native
/// coins; USDC rides the EVM chain as an ERC-20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinKind {
    Bitcoin,
    Ethereum,
    Solana,
    UsdcEthereum,
}

impl CoinKind {
    pub const ALL: [Self; 4] = [
        Self::Bitcoin,
        Self::Ethereum,
        Self::Solana,
        Self::UsdcEthereum,
    ];

    pub const fn chain(self) -> Chain {
        match self {
            Self::Bitcoin => Chain::Bitcoin,
            Self::Ethereum | Self::UsdcEthereum => Chain::Evm,
            Self::Solana => Chain::Solana,
        }
    }

    pub const fn decimals(self) -> u32 {
        match self {
            Self::Bitcoin => 8,
            Self::Ethereum => 18,
            Self::Solana => 9,
            Self::UsdcEthereum => 6,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bitcoin => "btc",
            Self::Ethereum => "eth",
            Self::Solana => "sol",
            Self::UsdcEthereum => "usdc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "btc" | "bitcoin" => Some(Self::Bitcoin),
            "eth" | "ethereum" => Some(Self::Ethereum),
            "sol" | "solana" => Some(Self::Solana),
            "usdc" => Some(Self::UsdcEthereum),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_kind_maps_to_chain_and_decimals() {
        assert_eq!(CoinKind::Bitcoin.chain(), Chain::Bitcoin);
        assert_eq!(CoinKind::UsdcEthereum.chain(), Chain::Evm);
        assert_eq!(CoinKind::UsdcEthereum.decimals(), 6);
        assert_eq!(CoinKind::Ethereum.decimals(), 18);
    }

    #[test]
    fn usdc_contract_known_on_both_networks() {
        assert!(EvmNetwork::Mainnet.usdc_contract().is_some());
        assert!(EvmNetwork::Sepolia.usdc_contract().is_some());
    }

    #[test]
    fn coin_kind_parse_roundtrip() {
        for k in CoinKind::ALL {
            assert_eq!(CoinKind::parse(k.as_str()), Some(k));
        }
        assert_eq!(CoinKind::parse("doge"), None);
    }
}
