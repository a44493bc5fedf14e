use crate::errors::WalletError;
use crate::fees::GasTiers;
use crate::retry::{with_endpoints, RetryPolicy};
use alloy::{
    consensus::{SignableTransaction as _, TxLegacy},
    eips::eip2718::Encodable2718 as _,
    primitives::{Address, Bytes, TxKind, U256},
    providers::{Provider as _, RootProvider},
    signers::{local::PrivateKeySigner, SignerSync as _},
    sol,
    sol_types::SolCall as _,
};
use eyre::Context as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr as _;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type EvmProvider = RootProvider;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function transfer(address to, uint256 value) returns (bool);
    }
}

/// Network collaborator surface for the EVM chain.
pub trait EvmApi {
    /// Pending-inclusive account nonce.
    fn fetch_nonce(&self, address: &str) -> impl Future<Output = eyre::Result<u64>> + Send;
    /// Safe/propose/fast gas-price tiers in Gwei.
    fn fetch_gas_tiers(&self) -> impl Future<Output = eyre::Result<GasTiers>> + Send;
    /// Submit raw signed bytes; returns the node-reported transaction hash.
    fn broadcast(&self, raw_hex: &str) -> impl Future<Output = eyre::Result<String>> + Send;
    fn fetch_balance(&self, address: &str) -> impl Future<Output = eyre::Result<U256>> + Send;
    fn fetch_erc20_balance(
        &self,
        token: &str,
        owner: &str,
    ) -> impl Future<Output = eyre::Result<U256>> + Send;
    /// `Some(success)` once mined, `None` while pending.
    fn fetch_receipt_status(
        &self,
        tx_hash: &str,
    ) -> impl Future<Output = eyre::Result<Option<bool>>> + Send;
}

/// JSON-RPC + gas-oracle client. Read calls rotate across the primary URL
/// and fallbacks with bounded backoff; broadcast is a single attempt.
#[derive(Debug, Clone)]
pub struct EvmRpc {
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
    pub gas_oracle_base_url: String,
    pub gas_oracle_api_key: Option<String>,
}

impl EvmRpc {
    pub fn new(
        rpc_url: &str,
        fallback_rpc_urls: Vec<String>,
        gas_oracle_base_url: &str,
        gas_oracle_api_key: Option<String>,
    ) -> Self {
        Self {
            rpc_url: rpc_url.to_owned(),
            fallback_rpc_urls,
            gas_oracle_base_url: gas_oracle_base_url.trim_end_matches('/').to_owned(),
            gas_oracle_api_key,
        }
    }

    fn provider_for_url(url: &str) -> eyre::Result<EvmProvider> {
        let u: reqwest::Url = url
            .parse()
            .with_context(|| format!("invalid rpc url: {url}"))?;
        let client = Client::builder()
            .timeout(DEFAULT_RPC_TIMEOUT)
            .connect_timeout(DEFAULT_RPC_CONNECT_TIMEOUT)
            .build()
            .context("build rpc http client")?;
        let http = alloy::transports::http::Http::with_client(client, u);
        let rpc_client = alloy::rpc::client::RpcClient::new(http, false);
        Ok(RootProvider::new(rpc_client))
    }

    fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = Vec::with_capacity(1 + self.fallback_rpc_urls.len());
        if !self.rpc_url.trim().is_empty() {
            urls.push(self.rpc_url.trim().to_owned());
        }
        for u in &self.fallback_rpc_urls {
            let t = u.trim();
            if !t.is_empty() && !urls.iter().any(|x| x == t) {
                urls.push(t.to_owned());
            }
        }
        urls
    }

    async fn with_fallback<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(EvmProvider) -> Fut + Sync,
    ) -> eyre::Result<T>
    where
        T: Send,
        Fut: Future<Output = eyre::Result<T>> + Send,
    {
        let urls = self.all_rpc_urls();
        let policy = RetryPolicy::default();
        with_endpoints(
            &urls,
            &policy,
            |u| {
                let u = u.clone();
                let f = &f;
                async move {
                    let p = Self::provider_for_url(&u)?;
                    f(p).await
                }
            },
            context_label,
        )
        .await
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GasOracleResult {
    #[serde(rename = "SafeGasPrice")]
    safe: String,
    #[serde(rename = "ProposeGasPrice")]
    propose: String,
    #[serde(rename = "FastGasPrice")]
    fast: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GasOracleResp {
    result: GasOracleResult,
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "gwei values are clamped non-negative and small before the cast"
)]
fn parse_gwei(s: &str) -> eyre::Result<u64> {
    let v: f64 = s.trim().parse().context("parse gwei")?;
    if !v.is_finite() || v < 0.0 {
        eyre::bail!("gas oracle returned invalid gwei: {s}");
    }
    Ok(v.ceil().min(1_000_000.0) as u64)
}

impl EvmApi for EvmRpc {
    async fn fetch_nonce(&self, address: &str) -> eyre::Result<u64> {
        let addr = parse_address(address)?;
        self.with_fallback("get nonce", |p| async move {
            let n = p
                .get_transaction_count(addr)
                .pending()
                .await
                .context("get nonce")?;
            Ok(n)
        })
        .await
    }

    async fn fetch_gas_tiers(&self) -> eyre::Result<GasTiers> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build http client")?;
        let mut url = format!(
            "{}?module=gastracker&action=gasoracle",
            self.gas_oracle_base_url
        );
        if let Some(k) = &self.gas_oracle_api_key {
            url.push_str("&apikey=");
            url.push_str(k.trim());
        }
        let resp: GasOracleResp = client
            .get(url)
            .send()
            .await
            .context("gas oracle request")?
            .error_for_status()
            .context("gas oracle status")?
            .json()
            .await
            .context("gas oracle json")?;
        Ok(GasTiers {
            safe_gwei: parse_gwei(&resp.result.safe)?,
            propose_gwei: parse_gwei(&resp.result.propose)?,
            fast_gwei: parse_gwei(&resp.result.fast)?,
        })
    }

    async fn broadcast(&self, raw_hex: &str) -> eyre::Result<String> {
        let bytes = hex::decode(raw_hex.trim().trim_start_matches("0x"))
            .context("decode raw tx hex")?;
        let p = Self::provider_for_url(&self.rpc_url)?;
        match p.send_raw_transaction(&bytes).await {
            Ok(pending) => Ok(pending.tx_hash().to_string()),
            Err(e) => Err(WalletError::BroadcastRejected(e.to_string()).into()),
        }
    }

    async fn fetch_balance(&self, address: &str) -> eyre::Result<U256> {
        let addr = parse_address(address)?;
        self.with_fallback("get balance", |p| async move {
            let v = p.get_balance(addr).await.context("get balance")?;
            Ok(v)
        })
        .await
    }

    async fn fetch_erc20_balance(&self, token: &str, owner: &str) -> eyre::Result<U256> {
        let token = parse_address(token)?;
        let owner = parse_address(owner)?;
        self.with_fallback("erc20 balance", |p| async move {
            let c = IERC20::new(token, &p);
            let bal = c.balanceOf(owner).call().await.context("erc20 balanceOf")?;
            Ok(bal)
        })
        .await
    }

    async fn fetch_receipt_status(&self, tx_hash: &str) -> eyre::Result<Option<bool>> {
        let hash: alloy::primitives::B256 = tx_hash
            .trim()
            .parse()
            .context("parse tx hash")?;
        self.with_fallback("get receipt", |p| async move {
            let r = p
                .get_transaction_receipt(hash)
                .await
                .context("get transaction receipt")?;
            Ok(r.map(|r| r.status()))
        })
        .await
    }
}

pub fn parse_address(s: &str) -> eyre::Result<Address> {
    Address::from_str(s.trim())
        .map_err(|_| WalletError::InvalidInput(format!("invalid evm address: {s}")).into())
}

/// Everything needed to sign later, persisted between create and sign.
/// Wei values are decimal strings so the record survives JSON round-trips
/// without u128 precision concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmUnsignedTx {
    /// Destination of the raw transaction: recipient for native sends, the
    /// token contract for ERC-20 sends.
    pub to: String,
    pub value_wei: String,
    /// ABI calldata, hex, empty for native transfers.
    pub input_hex: String,
    pub nonce: u64,
    pub gas_price_wei: String,
    pub gas_limit: u64,
    pub chain_id: u64,
}

pub fn build_native_transfer(
    to: &str,
    value_wei: u128,
    nonce: u64,
    gas_price_wei: u128,
    gas_limit: u64,
    chain_id: u64,
) -> eyre::Result<EvmUnsignedTx> {
    parse_address(to)?;
    Ok(EvmUnsignedTx {
        to: to.trim().to_owned(),
        value_wei: value_wei.to_string(),
        input_hex: String::new(),
        nonce,
        gas_price_wei: gas_price_wei.to_string(),
        gas_limit,
        chain_id,
    })
}

/// ERC-20 `transfer(address,uint256)` against the token contract. The amount
/// is already in the token's base units (6 decimals for USDC).
pub fn build_token_transfer(
    contract: &str,
    recipient: &str,
    amount_base: u128,
    nonce: u64,
    gas_price_wei: u128,
    gas_limit: u64,
    chain_id: u64,
) -> eyre::Result<EvmUnsignedTx> {
    let to = parse_address(recipient)?;
    parse_address(contract)?;
    let calldata = IERC20::transferCall {
        to,
        value: U256::from(amount_base),
    }
    .abi_encode();
    Ok(EvmUnsignedTx {
        to: contract.trim().to_owned(),
        value_wei: "0".to_owned(),
        input_hex: hex::encode(calldata),
        nonce,
        gas_price_wei: gas_price_wei.to_string(),
        gas_limit,
        chain_id,
    })
}

#[derive(Debug, Clone)]
pub struct SignedEvmTx {
    pub raw_hex: String,
    /// Hash computed locally from the signed payload; must match what the
    /// node reports after broadcast.
    pub tx_hash: String,
}

/// Sign as a legacy transaction with the chain id baked in (EIP-155 replay
/// protection) and serialise to raw wire bytes.
pub fn sign_transfer(unsigned: &EvmUnsignedTx, signer: &PrivateKeySigner) -> eyre::Result<SignedEvmTx> {
    let to = parse_address(&unsigned.to)?;
    let value: u128 = unsigned
        .value_wei
        .parse()
        .context("parse stored value_wei")?;
    let gas_price: u128 = unsigned
        .gas_price_wei
        .parse()
        .context("parse stored gas_price_wei")?;
    let input = if unsigned.input_hex.is_empty() {
        Bytes::new()
    } else {
        Bytes::from(hex::decode(&unsigned.input_hex).context("decode stored calldata")?)
    };

    let tx = TxLegacy {
        chain_id: Some(unsigned.chain_id),
        nonce: unsigned.nonce,
        gas_price,
        gas_limit: unsigned.gas_limit,
        to: TxKind::Call(to),
        value: U256::from(value),
        input,
    };

    let sighash = tx.signature_hash();
    let sig = signer
        .sign_hash_sync(&sighash)
        .map_err(|e| WalletError::SigningFailed(e.to_string()))?;
    let signed = tx.into_signed(sig);
    let tx_hash = signed.hash().to_string();
    let envelope = alloy::consensus::TxEnvelope::Legacy(signed);
    let raw_hex = hex::encode(envelope.encoded_2718());

    Ok(SignedEvmTx { raw_hex, tx_hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";
    const USDC_MAINNET: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

    fn test_signer() -> eyre::Result<PrivateKeySigner> {
        Ok(PrivateKeySigner::from_slice(&[1_u8; 32])?)
    }

    #[test]
    fn token_transfer_encodes_erc20_call() -> eyre::Result<()> {
        let unsigned = build_token_transfer(
            USDC_MAINNET,
            RECIPIENT,
            1_500_000, // 1.5 USDC at 6 decimals
            3,
            20_000_000_000,
            78_000,
            1,
        )?;
        // transfer(address,uint256) selector.
        assert!(unsigned.input_hex.starts_with("a9059cbb"));
        // Recipient is ABI-padded into the first argument slot.
        assert!(unsigned
            .input_hex
            .contains(&RECIPIENT.trim_start_matches("0x").to_lowercase()));
        // 4-byte selector + two 32-byte words.
        assert_eq!(unsigned.input_hex.len(), 2 * (4 + 32 + 32));
        assert_eq!(unsigned.to, USDC_MAINNET);
        assert_eq!(unsigned.value_wei, "0");
        Ok(())
    }

    #[test]
    fn native_transfer_has_no_calldata() -> eyre::Result<()> {
        let unsigned =
            build_native_transfer(RECIPIENT, 10_000_000_000_000_000, 0, 20_000_000_000, 21_000, 1)?;
        assert!(unsigned.input_hex.is_empty());
        assert_eq!(unsigned.gas_limit, 21_000);
        Ok(())
    }

    #[test]
    fn build_rejects_malformed_addresses() {
        assert!(build_native_transfer("zzz", 1, 0, 1, 21_000, 1).is_err());
        assert!(build_token_transfer(USDC_MAINNET, "0x123", 1, 0, 1, 78_000, 1).is_err());
    }

    #[test]
    fn signing_is_deterministic_and_hash_is_local() -> eyre::Result<()> {
        let signer = test_signer()?;
        let unsigned =
            build_native_transfer(RECIPIENT, 1_000_000_000_000_000, 7, 25_000_000_000, 21_000, 1)?;

        let a = sign_transfer(&unsigned, &signer)?;
        let b = sign_transfer(&unsigned, &signer)?;
        assert_eq!(a.raw_hex, b.raw_hex);
        assert_eq!(a.tx_hash, b.tx_hash);
        assert!(a.tx_hash.starts_with("0x"));
        assert_eq!(a.tx_hash.len(), 66);
        Ok(())
    }

    #[test]
    fn chain_id_changes_the_signature() -> eyre::Result<()> {
        let signer = test_signer()?;
        let mainnet =
            build_native_transfer(RECIPIENT, 1_000, 0, 20_000_000_000, 21_000, 1)?;
        let sepolia =
            build_native_transfer(RECIPIENT, 1_000, 0, 20_000_000_000, 21_000, 11_155_111)?;
        let a = sign_transfer(&mainnet, &signer)?;
        let b = sign_transfer(&sepolia, &signer)?;
        assert_ne!(a.raw_hex, b.raw_hex);
        assert_ne!(a.tx_hash, b.tx_hash);
        Ok(())
    }

    #[test]
    fn gwei_parser_rejects_garbage() {
        assert!(parse_gwei("30").is_ok());
        assert!(parse_gwei("30.5").is_ok());
        assert!(parse_gwei("-1").is_err());
        assert!(parse_gwei("lots").is_err());
    }
}
