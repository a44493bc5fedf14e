use crate::errors::WalletError;
use crate::fees::bitcoin_tx_size_bytes;
use eyre::Context as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    Address, Amount, CompressedPublicKey, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Witness,
};

pub const DUST_THRESHOLD_SATS: u64 = 546;

/// An unspent output. Fetched fresh per build; never persisted as wallet
/// state. The input script is reconstructed from the wallet's own address
/// (single-address model), so the record carries no scriptPubKey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

/// Network collaborator surface for the UTXO chain. The HTTP client below is
/// the production implementation; tests substitute their own.
pub trait BitcoinApi {
    fn fetch_utxos(&self, address: &str)
        -> impl Future<Output = eyre::Result<Vec<Utxo>>> + Send;
    /// Confirmation-target (blocks) to sat/vB table.
    fn fetch_fee_estimates(&self)
        -> impl Future<Output = eyre::Result<BTreeMap<u16, f64>>> + Send;
    fn broadcast(&self, tx_hex: &str) -> impl Future<Output = eyre::Result<String>> + Send;
    /// (confirmed, unconfirmed) sats.
    fn fetch_balance(&self, address: &str)
        -> impl Future<Output = eyre::Result<(u64, u64)>> + Send;
    /// `None` while the transaction is unknown to the explorer.
    fn fetch_tx_confirmed(&self, txid: &str)
        -> impl Future<Output = eyre::Result<Option<bool>>> + Send;
}

fn is_loopback_http(url: &str) -> bool {
    fn host_prefix_ok(s: &str, prefix: &str) -> bool {
        if !s.starts_with(prefix) {
            return false;
        }
        matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
    }
    let u = url.trim();
    host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

/// Blockstream-compatible HTTP explorer client.
#[derive(Debug, Clone)]
pub struct EsploraClient {
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AddrStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct AddrResp {
    chain_stats: AddrStats,
    mempool_stats: AddrStats,
}

#[derive(Debug, Clone, Deserialize)]
struct TxStatusResp {
    confirmed: bool,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> eyre::Result<Self> {
        let u = base_url.trim();
        if !(u.starts_with("https://") || is_loopback_http(u)) {
            eyre::bail!("bitcoin_api_base_url must use https (or http://localhost for local testing)");
        }
        Ok(Self {
            base_url: u.trim_end_matches('/').to_owned(),
        })
    }

    fn client() -> eyre::Result<Client> {
        Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build http client")
    }
}

impl BitcoinApi for EsploraClient {
    async fn fetch_utxos(&self, address: &str) -> eyre::Result<Vec<Utxo>> {
        let client = Self::client()?;
        let url = format!("{}/address/{}/utxo", self.base_url, address.trim());
        let resp = client.get(url).send().await.context("fetch utxos")?;
        if !resp.status().is_success() {
            eyre::bail!("bitcoin upstream returned http {}", resp.status());
        }
        let v: Vec<Utxo> = resp.json().await.context("decode utxos json")?;
        Ok(v)
    }

    async fn fetch_fee_estimates(&self) -> eyre::Result<BTreeMap<u16, f64>> {
        let client = Self::client()?;
        let url = format!("{}/fee-estimates", self.base_url);
        let resp = client.get(url).send().await.context("fetch fee estimates")?;
        if !resp.status().is_success() {
            eyre::bail!("bitcoin upstream returned http {}", resp.status());
        }
        let v: BTreeMap<String, f64> = resp.json().await.context("decode fee json")?;
        let mut out = BTreeMap::new();
        for (k, rate) in v {
            if let Ok(target) = k.parse::<u16>() {
                out.insert(target, rate);
            }
        }
        Ok(out)
    }

    async fn broadcast(&self, tx_hex: &str) -> eyre::Result<String> {
        let client = Self::client()?;
        let url = format!("{}/tx", self.base_url);
        let resp = client
            .post(url)
            .header("content-type", "text/plain")
            .body(tx_hex.trim().to_owned())
            .send()
            .await
            .context("broadcast btc tx")?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WalletError::BroadcastRejected(body.trim().to_owned()).into());
        }
        let txid = resp.text().await.context("read txid")?;
        Ok(txid.trim().to_owned())
    }

    async fn fetch_balance(&self, address: &str) -> eyre::Result<(u64, u64)> {
        let client = Self::client()?;
        let url = format!("{}/address/{}", self.base_url, address.trim());
        let resp = client.get(url).send().await.context("fetch btc address")?;
        if !resp.status().is_success() {
            eyre::bail!("bitcoin upstream returned http {}", resp.status());
        }
        let v: AddrResp = resp.json().await.context("decode address json")?;
        let confirmed = v
            .chain_stats
            .funded_txo_sum
            .saturating_sub(v.chain_stats.spent_txo_sum);
        let unconfirmed = v
            .mempool_stats
            .funded_txo_sum
            .saturating_sub(v.mempool_stats.spent_txo_sum);
        Ok((confirmed, unconfirmed))
    }

    async fn fetch_tx_confirmed(&self, txid: &str) -> eyre::Result<Option<bool>> {
        let client = Self::client()?;
        let url = format!("{}/tx/{}/status", self.base_url, txid.trim());
        let resp = client.get(url).send().await.context("fetch tx status")?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            eyre::bail!("bitcoin upstream returned http {}", resp.status());
        }
        let v: TxStatusResp = resp.json().await.context("decode tx status")?;
        Ok(Some(v.confirmed))
    }
}

/// Coin selection. Smallest-first keeps large outputs intact and shaves
/// future dust; if it cannot reach the target the largest-first pass is
/// tried before giving up. Ordering among equal values is whatever the
/// stable sort leaves and is not part of the contract.
pub fn select_utxos(utxos: &[Utxo], target: u64) -> Result<Vec<Utxo>, WalletError> {
    if utxos.is_empty() {
        return Err(WalletError::NoUtxo);
    }

    let mut asc: Vec<Utxo> = utxos.to_vec();
    asc.sort_by_key(|u| u.value);

    if let Some(sel) = accumulate(&asc, target) {
        return Ok(sel);
    }

    let mut desc = asc;
    desc.reverse();
    if let Some(sel) = accumulate(&desc, target) {
        return Ok(sel);
    }

    let available = utxos.iter().map(|u| u128::from(u.value)).sum();
    Err(WalletError::InsufficientFunds {
        available,
        required: u128::from(target),
    })
}

fn accumulate(ordered: &[Utxo], target: u64) -> Option<Vec<Utxo>> {
    let mut selected = vec![];
    let mut total = 0_u64;
    for u in ordered {
        selected.push(u.clone());
        total = total.saturating_add(u.value);
        if total >= target {
            return Some(selected);
        }
    }
    None
}

/// Apply the dust rule to a selected input set: change at or above the
/// threshold becomes an output back to the sender; positive change below it
/// is absorbed into the fee (no output). Returns (effective fee, change
/// output value if any).
pub fn split_change(
    total_in: u64,
    amount: u64,
    fee: u64,
) -> Result<(u64, Option<u64>), WalletError> {
    let spend = amount
        .checked_add(fee)
        .ok_or_else(|| WalletError::InvalidInput("amount + fee overflows".into()))?;
    if total_in < spend {
        return Err(WalletError::InsufficientFunds {
            available: u128::from(total_in),
            required: u128::from(spend),
        });
    }
    let change = total_in - spend;
    if change >= DUST_THRESHOLD_SATS {
        Ok((fee, Some(change)))
    } else {
        Ok((fee + change, None))
    }
}

/// A fully planned (but unsigned) spend: inputs chosen, fee fixed, dust
/// policy applied. Serialisable so the lifecycle can persist it between the
/// create and sign steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinTxPlan {
    pub inputs: Vec<Utxo>,
    pub to_address: String,
    pub amount_sats: u64,
    pub fee_sats: u64,
    pub change_sats: Option<u64>,
    pub fee_rate_sat_vb: u64,
}

/// Select inputs and fix the fee for a spend. The size formula needs the
/// input count and selection needs the fee, so this iterates to a fixpoint
/// (bounded by the UTXO count; fee grows monotonically with inputs).
pub fn plan_transaction(
    utxos: &[Utxo],
    to_address: &str,
    amount_sats: u64,
    fee_rate_sat_vb: u64,
) -> Result<BitcoinTxPlan, WalletError> {
    if amount_sats == 0 {
        return Err(WalletError::InvalidInput("amount must be > 0".into()));
    }

    let mut assumed_inputs = 1_usize;
    for _ in 0..=utxos.len() {
        let fee = bitcoin_tx_size_bytes(assumed_inputs, 2).saturating_mul(fee_rate_sat_vb);
        let target = amount_sats.saturating_add(fee);
        let selected = select_utxos(utxos, target)?;
        if selected.len() == assumed_inputs {
            let total_in: u64 = selected.iter().map(|u| u.value).sum();
            let (fee_sats, change_sats) = split_change(total_in, amount_sats, fee)?;
            return Ok(BitcoinTxPlan {
                inputs: selected,
                to_address: to_address.to_owned(),
                amount_sats,
                fee_sats,
                change_sats,
                fee_rate_sat_vb,
            });
        }
        assumed_inputs = selected.len();
    }
    // The loop always terminates earlier: selection size is monotonic in the
    // target and bounded by the UTXO count.
    Err(WalletError::InsufficientFunds {
        available: utxos.iter().map(|u| u128::from(u.value)).sum(),
        required: u128::from(amount_sats),
    })
}

#[derive(Debug, Clone)]
pub struct SignedBitcoinTx {
    pub tx_hex: String,
    pub txid: String,
    pub fee_sats: u64,
}

/// Sign every planned input with the wallet's single derived key
/// (SIGHASH_ALL), then verify each signature against its own sighash before
/// reporting the transaction as signed. A verification failure surfaces as
/// `SigningFailed`; the transaction is never returned in that case.
pub fn sign_plan(
    secp: &Secp256k1<All>,
    plan: &BitcoinTxPlan,
    from_key: &bitcoin::PrivateKey,
    network: crate::chains::BitcoinNetwork,
) -> eyre::Result<SignedBitcoinTx> {
    let pubkey = from_key.public_key(secp);
    let cpk = CompressedPublicKey::try_from(pubkey).context("btc compressed pubkey")?;
    let own_addr = Address::p2wpkh(&cpk, crate::derivation::known_hrp(network.to_lib()));
    let prev_spk = own_addr.script_pubkey();

    let to_addr: Address = plan
        .to_address
        .parse::<Address<_>>()
        .map_err(|_| WalletError::InvalidInput(format!("invalid address {}", plan.to_address)))?
        .require_network(network.to_lib())
        .map_err(|_| {
            WalletError::InvalidInput("destination address is for a different network".into())
        })?;

    let mut outputs: Vec<TxOut> = vec![TxOut {
        value: Amount::from_sat(plan.amount_sats),
        script_pubkey: to_addr.script_pubkey(),
    }];
    if let Some(change) = plan.change_sats {
        outputs.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: own_addr.script_pubkey(),
        });
    }

    let mut inputs: Vec<TxIn> = vec![];
    for u in &plan.inputs {
        let txid: bitcoin::Txid = u.txid.parse().context("parse utxo txid")?;
        inputs.push(TxIn {
            previous_output: OutPoint { txid, vout: u.vout },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        });
    }

    let mut tx = Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: inputs,
        output: outputs,
    };

    // Sign each input (BIP143), same sighash policy for all of them.
    let mut sigs = vec![];
    {
        let mut cache = SighashCache::new(&mut tx);
        for (i, u) in plan.inputs.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    i,
                    &prev_spk,
                    Amount::from_sat(u.value),
                    EcdsaSighashType::All,
                )
                .context("compute sighash")?;
            let digest = sighash.to_byte_array();
            let msg = Message::from_digest_slice(&digest).context("sighash to secp message")?;
            let sig = secp.sign_ecdsa(&msg, &from_key.inner);
            sigs.push((msg, sig));
            let btc_sig = bitcoin::ecdsa::Signature::sighash_all(sig);
            let w = cache
                .witness_mut(i)
                .ok_or_else(|| eyre::eyre!("witness index out of bounds"))?;
            *w = Witness::p2wpkh(&btc_sig, &pubkey.inner);
        }
    }

    // Verify the assembled transaction against its own inputs.
    for (msg, sig) in &sigs {
        if secp.verify_ecdsa(msg, sig, &pubkey.inner).is_err() {
            return Err(WalletError::SigningFailed(
                "input signature failed post-sign verification".into(),
            )
            .into());
        }
    }

    let txid = tx.compute_txid().to_string();
    let tx_hex = hex::encode(serialize(&tx));

    Ok(SignedBitcoinTx {
        tx_hex,
        txid,
        fee_sats: plan.fee_sats,
    })
}
