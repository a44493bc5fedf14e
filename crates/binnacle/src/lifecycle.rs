use crate::{
    amount,
    chains::{
        bitcoin::{self, BitcoinApi},
        evm::{self, EvmApi},
        solana::{self, SolanaApi},
        Chain, CoinKind,
    },
    config::NetworkMode,
    derivation,
    errors::WalletError,
    fees::{self, EvmOperation, FeePriority, FALLBACK_GAS_TIERS},
    keystore::SecretType,
    session::SessionGate,
    txstore::{TransactionRecord, TxPayload, TxStatus, TxStore},
    wallet::{Coin, WalletManager, WalletRecord},
};
use solana_signer::Signer as _;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub wallet: String,
    pub coin: CoinKind,
    pub to: String,
    /// Human decimal amount ("0.001"); converted with the coin's decimals.
    pub amount_ui: String,
    pub priority: FeePriority,
}

/// Orchestrates the per-send state machine across the three chain engines.
///
/// Generic over the collaborator traits so tests drive the full pipeline
/// against in-memory networks. Sends for the same (wallet, chain) pair are
/// serialised through an async mutex: two concurrent creates must not select
/// overlapping UTXOs or reuse a nonce.
pub struct LifecycleManager<B, E, S> {
    wallets: WalletManager,
    txs: TxStore,
    session: Arc<SessionGate>,
    bitcoin: B,
    evm: E,
    solana: S,
    mode: NetworkMode,
    locks: Mutex<HashMap<(String, Chain), Arc<Mutex<()>>>>,
}

impl<B: BitcoinApi, E: EvmApi, S: SolanaApi> LifecycleManager<B, E, S> {
    pub fn new(
        wallets: WalletManager,
        txs: TxStore,
        session: Arc<SessionGate>,
        bitcoin: B,
        evm: E,
        solana: S,
        mode: NetworkMode,
    ) -> Self {
        Self {
            wallets,
            txs,
            session,
            bitcoin,
            evm,
            solana,
            mode,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub const fn wallets(&self) -> &WalletManager {
        &self.wallets
    }

    pub const fn transactions(&self) -> &TxStore {
        &self.txs
    }

    async fn lock_for(&self, wallet_id: &str, chain: Chain) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        Arc::clone(
            map.entry((wallet_id.to_owned(), chain))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn resolve(&self, wallet_name: &str, kind: CoinKind) -> eyre::Result<(WalletRecord, Coin)> {
        let w = self.wallets.get(wallet_name)?;
        let coin = w
            .coin(kind)
            .ok_or_else(|| WalletError::CoinNotFound {
                wallet: wallet_name.to_owned(),
                coin: kind.as_str().to_owned(),
            })?
            .clone();
        Ok((w, coin))
    }

    fn wallet_by_id(&self, wallet_id: &str) -> eyre::Result<WalletRecord> {
        self.wallets
            .store()
            .list()?
            .into_iter()
            .find(|w| w.id == wallet_id)
            .ok_or_else(|| WalletError::WalletNotFound(wallet_id.to_owned()).into())
    }

    /// Create: resolve the wallet, quote the fee, build the unsigned
    /// transaction, persist as PENDING. Every call mints a fresh id.
    pub async fn create(&self, req: &SendRequest) -> eyre::Result<TransactionRecord> {
        let (w, _) = self.resolve(&req.wallet, req.coin)?;
        let lock = self.lock_for(&w.id, req.coin.chain()).await;
        let _guard = lock.lock().await;
        self.create_inner(req).await
    }

    async fn create_inner(&self, req: &SendRequest) -> eyre::Result<TransactionRecord> {
        let (w, coin) = self.resolve(&req.wallet, req.coin)?;
        let amount_base = amount::parse_ui_to_base(&req.amount_ui, req.coin.decimals())
            .map_err(|e| WalletError::InvalidInput(format!("{e:#}")))?;
        if amount_base == 0 {
            return Err(WalletError::InvalidInput("amount must be > 0".into()).into());
        }

        let (payload, fee_base) = match req.coin {
            CoinKind::Bitcoin => {
                let sats = u64::try_from(amount_base)
                    .map_err(|_| WalletError::InvalidInput("amount too large".into()))?;
                let utxos = self
                    .bitcoin
                    .fetch_utxos(&coin.address)
                    .await
                    .map_err(as_network_err)?;
                // Fee-table unavailability degrades to static fallback rates;
                // it never blocks the send.
                let table = match self.bitcoin.fetch_fee_estimates().await {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "fee estimates unavailable; using fallback rates");
                        std::collections::BTreeMap::new()
                    }
                };
                let quote = fees::estimate_bitcoin_fee(req.priority, 1, 2, &table);
                let plan =
                    bitcoin::plan_transaction(&utxos, &req.to, sats, quote.fee_rate_sat_vb)?;
                let fee = plan.fee_sats;
                (TxPayload::Bitcoin(plan), u128::from(fee))
            }
            CoinKind::Ethereum | CoinKind::UsdcEthereum => {
                let nonce = self
                    .evm
                    .fetch_nonce(&coin.address)
                    .await
                    .map_err(as_network_err)?;
                let tiers = match self.evm.fetch_gas_tiers().await {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "gas oracle unavailable; using fallback tiers");
                        FALLBACK_GAS_TIERS
                    }
                };
                let chain_id = self.mode.evm().chain_id();
                let unsigned = if req.coin == CoinKind::UsdcEthereum {
                    let contract = coin.contract_address.as_deref().ok_or_else(|| {
                        WalletError::UnsupportedNetwork(format!(
                            "no token contract recorded for {}",
                            coin.network
                        ))
                    })?;
                    let quote =
                        fees::estimate_evm_fee(req.priority, tiers, EvmOperation::TokenTransfer);
                    let tx = evm::build_token_transfer(
                        contract,
                        &req.to,
                        amount_base,
                        nonce,
                        quote.gas_price_wei,
                        quote.gas_limit,
                        chain_id,
                    )?;
                    (tx, quote.total_wei)
                } else {
                    let quote =
                        fees::estimate_evm_fee(req.priority, tiers, EvmOperation::NativeTransfer);
                    let tx = evm::build_native_transfer(
                        &req.to,
                        amount_base,
                        nonce,
                        quote.gas_price_wei,
                        quote.gas_limit,
                        chain_id,
                    )?;
                    (tx, quote.total_wei)
                };
                (TxPayload::Evm(unsigned.0), unsigned.1)
            }
            CoinKind::Solana => {
                let lamports = u64::try_from(amount_base)
                    .map_err(|_| WalletError::InvalidInput("amount too large".into()))?;
                let blockhash = self
                    .solana
                    .fetch_recent_blockhash()
                    .await
                    .map_err(as_network_err)?;
                let quote = fees::estimate_solana_fee(req.priority);
                let tx = solana::build_transfer(&req.to, lamports, &blockhash)?;
                (TxPayload::Solana(tx), u128::from(quote.lamports))
            }
        };

        let now = crate::keystore::utc_now_iso();
        let record = TransactionRecord {
            id: Uuid::new_v4().to_string(),
            wallet_id: w.id,
            coin: req.coin,
            chain: req.coin.chain(),
            from_address: coin.address,
            to_address: req.to.clone(),
            amount_base: amount_base.to_string(),
            fee_base: fee_base.to_string(),
            priority: req.priority,
            status: TxStatus::Pending,
            payload,
            signed_hex: None,
            local_hash: None,
            network_hash: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.txs.save(&record)?;
        self.txs.append_history(&record, "created")?;
        tracing::info!(tx = %record.id, chain = record.chain.as_str(), "transaction created");
        Ok(record)
    }

    /// Sign: gate on the session, pull the chain key from the secret store,
    /// verify the derived signer address against the recorded coin address,
    /// persist signed hex + local hash. Status stays PENDING.
    pub async fn sign(&self, tx_id: &str, bypass_session: bool) -> eyre::Result<TransactionRecord> {
        let record = self.txs.get(tx_id)?;
        let lock = self.lock_for(&record.wallet_id, record.chain).await;
        let _guard = lock.lock().await;
        self.sign_inner(record, bypass_session)
    }

    fn sign_inner(
        &self,
        mut record: TransactionRecord,
        bypass_session: bool,
    ) -> eyre::Result<TransactionRecord> {
        if record.status != TxStatus::Pending || record.is_signed() {
            return Err(WalletError::InvalidTransition {
                id: record.id,
                expected: "created-but-unsigned".into(),
            }
            .into());
        }
        if !bypass_session && self.session.authentication_required() {
            return Err(WalletError::AuthenticationRequired.into());
        }

        let w = self.wallet_by_id(&record.wallet_id)?;
        let coin = record
            .coin
            .chain()
            .as_str();
        let secret_type = match record.coin {
            CoinKind::Bitcoin => SecretType::BitcoinKey,
            CoinKind::Ethereum | CoinKind::UsdcEthereum => SecretType::EvmKey,
            CoinKind::Solana => SecretType::SolanaKey,
        };
        let key: Zeroizing<Vec<u8>> = self
            .wallets
            .secrets()
            .retrieve(&record.wallet_id, secret_type)?
            .ok_or_else(|| WalletError::KeyNotFound {
                wallet: w.name.clone(),
                secret_type: secret_type.as_str().to_owned(),
            })?;

        let (signed_hex, local_hash) = match &record.payload {
            TxPayload::Bitcoin(plan) => {
                let network = self.mode.bitcoin();
                let sk = derivation::bitcoin_key_from_secret(&key, network)?;
                let derived = derivation::bitcoin_address_for_key(&sk, network)?;
                verify_signer_address(&record.from_address, &derived)?;
                let secp = ::bitcoin::secp256k1::Secp256k1::new();
                let signed = bitcoin::sign_plan(&secp, plan, &sk, network)?;
                (signed.tx_hex, signed.txid)
            }
            TxPayload::Evm(unsigned) => {
                let signer = derivation::evm_signer_from_secret(&key)?;
                let derived = signer.address().to_checksum(None);
                verify_signer_address(&record.from_address, &derived)?;
                let signed = evm::sign_transfer(unsigned, &signer)?;
                (signed.raw_hex, signed.tx_hash)
            }
            TxPayload::Solana(unsigned) => {
                let kp = derivation::solana_keypair_from_secret(&key)?;
                let derived = kp.pubkey().to_string();
                verify_signer_address(&record.from_address, &derived)?;
                let signed = solana::sign_transfer(unsigned, &kp)?;
                (signed.tx_hex, signed.provisional_signature)
            }
        };
        drop(key);

        record.signed_hex = Some(signed_hex);
        record.local_hash = Some(local_hash);
        record.updated_at = crate::keystore::utc_now_iso();
        self.txs.save(&record)?;
        self.txs.append_history(&record, "signed")?;
        tracing::info!(tx = %record.id, chain = coin, "transaction signed");
        Ok(record)
    }

    /// Broadcast the signed bytes once. A network rejection marks the record
    /// FAILED with the verbatim error; a transport failure leaves it PENDING
    /// with the outcome unknown, to be reconciled later. No automatic
    /// retries; a fee bump is a new transaction, not a resend.
    pub async fn broadcast(&self, tx_id: &str) -> eyre::Result<TransactionRecord> {
        let record = self.txs.get(tx_id)?;
        let lock = self.lock_for(&record.wallet_id, record.chain).await;
        let _guard = lock.lock().await;
        self.broadcast_inner(record).await
    }

    async fn broadcast_inner(
        &self,
        mut record: TransactionRecord,
    ) -> eyre::Result<TransactionRecord> {
        if record.status != TxStatus::Pending {
            return Err(WalletError::InvalidTransition {
                id: record.id,
                expected: "pending".into(),
            }
            .into());
        }
        let Some(signed_hex) = record.signed_hex.clone() else {
            return Err(WalletError::InvalidTransition {
                id: record.id,
                expected: "signed".into(),
            }
            .into());
        };

        let result = match record.chain {
            Chain::Bitcoin => self.bitcoin.broadcast(&signed_hex).await,
            Chain::Evm => self.evm.broadcast(&signed_hex).await,
            Chain::Solana => self.solana.broadcast(&signed_hex).await,
        };

        match result {
            Ok(network_hash) => {
                record.status = TxStatus::Success;
                record.network_hash = Some(network_hash);
                record.updated_at = crate::keystore::utc_now_iso();
                self.txs.save(&record)?;
                self.txs.append_history(&record, "broadcast")?;
                tracing::info!(tx = %record.id, hash = ?record.network_hash, "broadcast succeeded");
                Ok(record)
            }
            Err(e) => {
                let rejected = e.downcast_ref::<WalletError>().and_then(|w| match w {
                    WalletError::BroadcastRejected(msg) => Some(msg.clone()),
                    _ => None,
                });
                if let Some(msg) = rejected {
                    record.status = TxStatus::Failed;
                    record.error = Some(msg.clone());
                    record.updated_at = crate::keystore::utc_now_iso();
                    self.txs.save(&record)?;
                    self.txs.append_history(&record, "broadcast")?;
                    tracing::warn!(tx = %record.id, error = %msg, "broadcast rejected");
                    Err(e)
                } else {
                    // Outcome unknown (e.g. timeout): stay PENDING for a
                    // later reconcile; never assume failure.
                    tracing::warn!(tx = %record.id, error = %format!("{e:#}"), "broadcast outcome unknown");
                    Err(as_network_err(e))
                }
            }
        }
    }

    /// Full pipeline under one (wallet, chain) lock.
    pub async fn send(
        &self,
        req: &SendRequest,
        bypass_session: bool,
    ) -> eyre::Result<TransactionRecord> {
        let (w, _) = self.resolve(&req.wallet, req.coin)?;
        let lock = self.lock_for(&w.id, req.coin.chain()).await;
        let _guard = lock.lock().await;

        let record = self.create_inner(req).await?;
        let record = self.sign_inner(record, bypass_session)?;
        self.broadcast_inner(record).await
    }

    /// Crash recovery: re-attempt broadcast for every PENDING record that
    /// already carries signed hex. Keys are never re-derived here.
    pub async fn recover_pending(&self) -> eyre::Result<Vec<TransactionRecord>> {
        let mut out = vec![];
        for record in self.txs.list_pending_signed()? {
            let id = record.id.clone();
            let lock = self.lock_for(&record.wallet_id, record.chain).await;
            let _guard = lock.lock().await;
            match self.broadcast_inner(record).await {
                Ok(r) => out.push(r),
                Err(e) => {
                    tracing::warn!(tx = %id, error = %format!("{e:#}"), "recovery broadcast failed");
                    if let Ok(r) = self.txs.get(&id) {
                        out.push(r);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Poll the chain for the authoritative outcome of a broadcast and fold
    /// it into the record.
    pub async fn reconcile(&self, tx_id: &str) -> eyre::Result<TransactionRecord> {
        let mut record = self.txs.get(tx_id)?;
        let Some(hash) = record.hash().map(str::to_owned) else {
            return Ok(record);
        };

        let outcome = match record.chain {
            Chain::Bitcoin => self
                .bitcoin
                .fetch_tx_confirmed(&hash)
                .await
                .map_err(as_network_err)?,
            Chain::Evm => self
                .evm
                .fetch_receipt_status(&hash)
                .await
                .map_err(as_network_err)?,
            Chain::Solana => {
                let ok = self
                    .solana
                    .confirm_signature(&hash)
                    .await
                    .map_err(as_network_err)?;
                ok.then_some(true)
            }
        };

        match outcome {
            Some(true) => {
                if record.status != TxStatus::Success {
                    record.status = TxStatus::Success;
                    record.network_hash.get_or_insert(hash);
                    record.updated_at = crate::keystore::utc_now_iso();
                    self.txs.save(&record)?;
                    self.txs.append_history(&record, "reconciled")?;
                }
            }
            Some(false) if record.chain == Chain::Evm => {
                // A mined-but-reverted EVM transaction is a terminal failure.
                record.status = TxStatus::Failed;
                record.error = Some("transaction reverted".into());
                record.updated_at = crate::keystore::utc_now_iso();
                self.txs.save(&record)?;
                self.txs.append_history(&record, "reconciled")?;
            }
            _ => {}
        }
        Ok(record)
    }

    /// Confirmed balance for a coin, formatted in UI units. Read-only; never
    /// touches the session gate or secrets.
    pub async fn balance(&self, wallet_name: &str, kind: CoinKind) -> eyre::Result<String> {
        let (_, coin) = self.resolve(wallet_name, kind)?;
        let base: u128 = match kind {
            CoinKind::Bitcoin => {
                let (confirmed, _) = self
                    .bitcoin
                    .fetch_balance(&coin.address)
                    .await
                    .map_err(as_network_err)?;
                u128::from(confirmed)
            }
            CoinKind::Ethereum => {
                let v = self
                    .evm
                    .fetch_balance(&coin.address)
                    .await
                    .map_err(as_network_err)?;
                u128::try_from(v).map_err(|_| {
                    WalletError::InvalidInput("balance exceeds displayable range".into())
                })?
            }
            CoinKind::UsdcEthereum => {
                let contract = coin.contract_address.as_deref().ok_or_else(|| {
                    WalletError::UnsupportedNetwork(format!(
                        "no token contract recorded for {}",
                        coin.network
                    ))
                })?;
                let v = self
                    .evm
                    .fetch_erc20_balance(contract, &coin.address)
                    .await
                    .map_err(as_network_err)?;
                u128::try_from(v).map_err(|_| {
                    WalletError::InvalidInput("balance exceeds displayable range".into())
                })?
            }
            CoinKind::Solana => {
                let v = self
                    .solana
                    .fetch_balance(&coin.address)
                    .await
                    .map_err(as_network_err)?;
                u128::from(v)
            }
        };
        amount::format_base_to_ui(base, kind.decimals())
    }
}

fn verify_signer_address(expected: &str, derived: &str) -> Result<(), WalletError> {
    // EVM addresses compare case-insensitively (checksum casing is display
    // metadata); the other chains are exact.
    let matches = if expected.starts_with("0x") {
        expected.eq_ignore_ascii_case(derived)
    } else {
        expected == derived
    };
    if matches {
        Ok(())
    } else {
        Err(WalletError::AddressMismatch {
            expected: expected.to_owned(),
            derived: derived.to_owned(),
        })
    }
}

/// Collaborator failures surface as retryable `NetworkUnavailable` unless
/// they already carry a domain meaning.
fn as_network_err(e: eyre::Report) -> eyre::Report {
    if e.downcast_ref::<WalletError>().is_some() {
        e
    } else {
        eyre::Report::new(WalletError::NetworkUnavailable(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_address_check_is_case_insensitive_only_for_evm() {
        assert!(verify_signer_address(
            "0x9858EfFD232B4033E47d90003D41EC34EcaEda94",
            "0x9858effd232b4033e47d90003d41ec34ecaeda94"
        )
        .is_ok());
        assert!(verify_signer_address("abc", "ABC").is_err());
        let err = verify_signer_address("bc1qa", "bc1qb");
        assert!(matches!(err, Err(WalletError::AddressMismatch { .. })));
    }
}
