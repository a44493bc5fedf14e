use crate::errors::WalletError;
use crate::retry::{with_endpoints, RetryPolicy};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use solana_address::Address;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::{
    hash::Hash, pubkey::Pubkey, signature::Keypair, signer::Signer as _,
    transaction::Transaction,
};
use solana_system_interface::instruction as system_instruction;
use std::future::Future;
use std::str::FromStr as _;

/// Network collaborator surface for the account chain.
pub trait SolanaApi {
    /// Freshness/anti-replay token. A transaction signed against a stale
    /// blockhash must be rebuilt with a new one, not re-broadcast.
    fn fetch_recent_blockhash(&self) -> impl Future<Output = eyre::Result<String>> + Send;
    /// Submit bincode-serialised signed bytes; returns the authoritative
    /// signature as reported by the network.
    fn broadcast(&self, tx_hex: &str) -> impl Future<Output = eyre::Result<String>> + Send;
    fn fetch_balance(&self, address: &str) -> impl Future<Output = eyre::Result<u64>> + Send;
    fn confirm_signature(
        &self,
        signature: &str,
    ) -> impl Future<Output = eyre::Result<bool>> + Send;
}

#[derive(Debug, Clone)]
pub struct SolanaRpc {
    pub rpc_url: String,
    pub fallback_rpc_urls: Vec<String>,
}

impl SolanaRpc {
    pub fn new(rpc_url: &str, fallback_rpc_urls: Vec<String>) -> Self {
        Self {
            rpc_url: rpc_url.to_owned(),
            fallback_rpc_urls,
        }
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

    fn client_for(url: &str) -> RpcClient {
        RpcClient::new_with_commitment(url.to_owned(), CommitmentConfig::confirmed())
    }

    async fn with_fallback<T, Fut>(
        &self,
        context_label: &'static str,
        f: impl Fn(RpcClient) -> Fut + Sync,
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
                async move { f(Self::client_for(&u)).await }
            },
            context_label,
        )
        .await
    }
}

impl SolanaApi for SolanaRpc {
    async fn fetch_recent_blockhash(&self) -> eyre::Result<String> {
        self.with_fallback("latest blockhash", |rpc| async move {
            let bh = rpc
                .get_latest_blockhash()
                .await
                .context("latest blockhash")?;
            Ok(bh.to_string())
        })
        .await
    }

    async fn broadcast(&self, tx_hex: &str) -> eyre::Result<String> {
        let bytes = hex::decode(tx_hex.trim()).context("decode tx hex")?;
        let tx: Transaction = bincode::deserialize(&bytes).context("decode solana tx")?;
        let rpc = Self::client_for(&self.rpc_url);
        match rpc.send_transaction(&tx).await {
            Ok(sig) => Ok(sig.to_string()),
            Err(e) => Err(WalletError::BroadcastRejected(e.to_string()).into()),
        }
    }

    async fn fetch_balance(&self, address: &str) -> eyre::Result<u64> {
        let owner = parse_pubkey(address)?;
        self.with_fallback("get balance", |rpc| async move {
            let v = rpc.get_balance(&owner).await.context("get balance")?;
            Ok(v)
        })
        .await
    }

    async fn confirm_signature(&self, signature: &str) -> eyre::Result<bool> {
        let sig: solana_sdk::signature::Signature = signature
            .trim()
            .parse()
            .context("parse signature")?;
        self.with_fallback("confirm tx", |rpc| async move {
            let ok = rpc.confirm_transaction(&sig).await.context("confirm tx")?;
            Ok(ok)
        })
        .await
    }
}

pub fn parse_pubkey(s: &str) -> eyre::Result<Pubkey> {
    Pubkey::from_str(s.trim())
        .map_err(|_| WalletError::InvalidInput(format!("invalid solana address: {s}")).into())
}

/// Persisted between create and sign. The blockhash is part of the plan:
/// if it goes stale the transaction is rebuilt, never merely re-signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaUnsignedTx {
    pub to: String,
    pub lamports: u64,
    pub recent_blockhash: String,
}

pub fn build_transfer(
    to: &str,
    lamports: u64,
    recent_blockhash: &str,
) -> eyre::Result<SolanaUnsignedTx> {
    parse_pubkey(to)?;
    Hash::from_str(recent_blockhash.trim()).context("parse blockhash")?;
    if lamports == 0 {
        return Err(WalletError::InvalidInput("amount must be > 0".into()).into());
    }
    Ok(SolanaUnsignedTx {
        to: to.trim().to_owned(),
        lamports,
        recent_blockhash: recent_blockhash.trim().to_owned(),
    })
}

#[derive(Debug, Clone)]
pub struct SignedSolanaTx {
    pub tx_hex: String,
    /// Best-effort local correlation id; the network's signature from
    /// broadcast is authoritative.
    pub provisional_signature: String,
}

/// Single-instruction system transfer, fee-payer = sender, signed with the
/// derived keypair and serialised to the wire encoding.
pub fn sign_transfer(
    unsigned: &SolanaUnsignedTx,
    keypair: &Keypair,
) -> eyre::Result<SignedSolanaTx> {
    let to = parse_pubkey(&unsigned.to)?;
    let blockhash =
        Hash::from_str(unsigned.recent_blockhash.trim()).context("parse stored blockhash")?;

    let from_addr = Address::new_from_array(keypair.pubkey().to_bytes());
    let to_addr = Address::new_from_array(to.to_bytes());
    let ix = system_instruction::transfer(&from_addr, &to_addr, unsigned.lamports);

    let msg = solana_sdk::message::Message::new(&[ix], Some(&keypair.pubkey()));
    let tx = Transaction::new(&[keypair], msg, blockhash);

    let bytes = bincode::serialize(&tx).context("serialize solana tx")?;
    Ok(SignedSolanaTx {
        provisional_signature: provisional_signature(&bytes),
        tx_hex: hex::encode(bytes),
    })
}

/// Local correlation id for a serialised transaction: the first 64 bytes of
/// the payload when it is long enough, otherwise a 64-byte hash-derived
/// placeholder. Base58-encoded either way.
pub fn provisional_signature(payload: &[u8]) -> String {
    if let Some(prefix) = payload.get(..64) {
        return bs58::encode(prefix).into_string();
    }
    let mut h = Sha256::new();
    h.update(payload);
    let first: [u8; 32] = h.finalize().into();
    let mut h2 = Sha256::new();
    h2.update(first);
    let second: [u8; 32] = h2.finalize().into();
    let mut out = [0_u8; 64];
    out[..32].copy_from_slice(&first);
    out[32..].copy_from_slice(&second);
    bs58::encode(out).into_string()
}
