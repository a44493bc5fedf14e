use crate::{
    chains::CoinKind,
    config::NetworkMode,
    derivation,
    errors::WalletError,
    keystore::{SecretStore, SecretType},
    mnemonic,
    paths::BinnaclePaths,
};
use bip39::Mnemonic;
use eyre::Context as _;
use rand::RngExt as _;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use uuid::Uuid;
use zeroize::Zeroizing;

/// One chain's key record for a wallet. Immutable after creation; exactly
/// one per (wallet, coin kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coin {
    pub kind: CoinKind,
    pub address: String,
    pub public_key: String,
    pub derivation_path: String,
    /// Network label the coin was derived for (mainnet/testnet/sepolia/...).
    pub network: String,
    /// Account-level extended public key (UTXO chain only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpub: Option<String>,
    /// Token contract address (token coins only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: String,
    pub name: String,
    /// SHA-256 fingerprint of the phrase; never the phrase itself.
    pub mnemonic_hash: String,
    pub created_at: String,
    pub is_backed_up: bool,
    pub network_mode: NetworkMode,
    pub coins: Vec<Coin>,
}

impl WalletRecord {
    pub fn coin(&self, kind: CoinKind) -> Option<&Coin> {
        self.coins.iter().find(|c| c.kind == kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalletIndex {
    pub wallets: Vec<WalletRecord>,
}

#[derive(Debug, Clone)]
pub struct WalletStore {
    index_path: PathBuf,
}

impl WalletStore {
    pub fn new(paths: &BinnaclePaths) -> Self {
        Self {
            index_path: paths.wallets_dir().join("index.json"),
        }
    }

    fn load_index(&self) -> eyre::Result<WalletIndex> {
        if !self.index_path.exists() {
            return Ok(WalletIndex::default());
        }
        let s = fs::read_to_string(&self.index_path).context("read wallet index")?;
        let v: WalletIndex = serde_json::from_str(&s).context("parse wallet index")?;
        Ok(v)
    }

    fn save_index(&self, idx: &WalletIndex) -> eyre::Result<()> {
        let s = serde_json::to_string_pretty(idx).context("serialize wallet index")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.index_path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write wallet index")?;
        Ok(())
    }

    pub fn list(&self) -> eyre::Result<Vec<WalletRecord>> {
        Ok(self.load_index()?.wallets)
    }

    pub fn get_by_name(&self, name: &str) -> eyre::Result<Option<WalletRecord>> {
        let idx = self.load_index()?;
        Ok(idx.wallets.into_iter().find(|w| w.name == name))
    }

    pub fn add(&self, wallet: WalletRecord) -> eyre::Result<()> {
        let mut idx = self.load_index()?;
        if idx.wallets.iter().any(|w| w.name == wallet.name) {
            eyre::bail!("wallet name already exists");
        }
        idx.wallets.push(wallet);
        self.save_index(&idx)?;
        Ok(())
    }

    pub fn update(&self, wallet: &WalletRecord) -> eyre::Result<()> {
        let mut idx = self.load_index()?;
        let pos = idx
            .wallets
            .iter()
            .position(|w| w.id == wallet.id)
            .ok_or_else(|| WalletError::WalletNotFound(wallet.name.clone()))?;
        let Some(dst) = idx.wallets.get_mut(pos) else {
            return Err(WalletError::WalletNotFound(wallet.name.clone()).into());
        };
        *dst = wallet.clone();
        self.save_index(&idx)?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> eyre::Result<WalletRecord> {
        let mut idx = self.load_index()?;
        let pos = idx
            .wallets
            .iter()
            .position(|w| w.name == name)
            .ok_or_else(|| WalletError::WalletNotFound(name.to_owned()))?;
        let removed = idx.wallets.remove(pos);
        self.save_index(&idx)?;
        Ok(removed)
    }
}

/// Wallet creation/import/backup orchestration: derives one coin per chain
/// from the phrase and puts every secret behind the encrypted store.
#[derive(Debug, Clone)]
pub struct WalletManager {
    wallets: WalletStore,
    secrets: SecretStore,
}

impl WalletManager {
    pub fn new(wallets: WalletStore, secrets: SecretStore) -> Self {
        Self { wallets, secrets }
    }

    pub const fn store(&self) -> &WalletStore {
        &self.wallets
    }

    pub const fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    /// Create a wallet from a freshly generated phrase.
    pub fn create(
        &self,
        name: &str,
        word_count: usize,
        mode: NetworkMode,
    ) -> eyre::Result<(WalletRecord, Mnemonic)> {
        let m = mnemonic::generate(word_count)?;
        let record = self.register(name, &m, mode)?;
        Ok((record, m))
    }

    /// Import an externally generated phrase. Checksum-validated first;
    /// the resulting coins are identical to a create with the same phrase.
    pub fn import(&self, name: &str, phrase: &str, mode: NetworkMode) -> eyre::Result<WalletRecord> {
        if !mnemonic::validate(phrase) {
            return Err(WalletError::InvalidInput("invalid mnemonic phrase".into()).into());
        }
        let m = mnemonic::parse(phrase)?;
        self.register(name, &m, mode)
    }

    fn register(
        &self,
        name: &str,
        m: &Mnemonic,
        mode: NetworkMode,
    ) -> eyre::Result<WalletRecord> {
        let wallet_id = Uuid::new_v4().to_string();

        let btc = derivation::derive_bitcoin(m, mode.bitcoin())?;
        let evm = derivation::derive_evm(m)?;
        let sol = derivation::derive_solana(m)?;

        let usdc_contract = mode
            .evm()
            .usdc_contract()
            .ok_or_else(|| {
                WalletError::UnsupportedNetwork(format!("no USDC contract for {:?}", mode.evm()))
            })?
            .to_owned();

        let (btc_net, evm_net, sol_net) = match mode {
            NetworkMode::Mainnet => ("mainnet", "mainnet", "mainnet-beta"),
            NetworkMode::Testnet => ("testnet", "sepolia", "devnet"),
        };

        let coins = vec![
            Coin {
                kind: CoinKind::Bitcoin,
                address: btc.address.clone(),
                public_key: btc.public_key.clone(),
                derivation_path: btc.derivation_path.clone(),
                network: btc_net.to_owned(),
                xpub: btc.xpub.clone(),
                contract_address: None,
            },
            Coin {
                kind: CoinKind::Ethereum,
                address: evm.address.clone(),
                public_key: evm.public_key.clone(),
                derivation_path: evm.derivation_path.clone(),
                network: evm_net.to_owned(),
                xpub: None,
                contract_address: None,
            },
            Coin {
                kind: CoinKind::UsdcEthereum,
                address: evm.address.clone(),
                public_key: evm.public_key.clone(),
                derivation_path: evm.derivation_path.clone(),
                network: evm_net.to_owned(),
                xpub: None,
                contract_address: Some(usdc_contract),
            },
            Coin {
                kind: CoinKind::Solana,
                address: sol.address.clone(),
                public_key: sol.public_key.clone(),
                derivation_path: sol.derivation_path.clone(),
                network: sol_net.to_owned(),
                xpub: None,
                contract_address: None,
            },
        ];

        let record = WalletRecord {
            id: wallet_id.clone(),
            name: name.to_owned(),
            mnemonic_hash: mnemonic::fingerprint(m),
            created_at: crate::keystore::utc_now_iso(),
            is_backed_up: false,
            network_mode: mode,
            coins,
        };
        self.wallets.add(record.clone())?;

        // Persist secrets only after the record exists; a failure here leaves
        // an unusable record rather than an orphaned key.
        let phrase = Zeroizing::new(m.to_string());
        self.secrets
            .store(&wallet_id, SecretType::Mnemonic, phrase.as_bytes())?;
        self.secrets
            .store(&wallet_id, SecretType::BitcoinKey, &btc.secret)?;
        self.secrets
            .store(&wallet_id, SecretType::EvmKey, &evm.secret)?;
        self.secrets
            .store(&wallet_id, SecretType::SolanaKey, &sol.secret)?;

        tracing::info!(wallet = %name, id = %wallet_id, "wallet registered");
        Ok(record)
    }

    pub fn get(&self, name: &str) -> eyre::Result<WalletRecord> {
        self.wallets
            .get_by_name(name)?
            .ok_or_else(|| WalletError::WalletNotFound(name.to_owned()).into())
    }

    /// Delete a wallet and everything it owns: coins (embedded in the
    /// record), secrets, and transaction records.
    pub fn delete(&self, name: &str, transactions: &crate::txstore::TxStore) -> eyre::Result<()> {
        let removed = self.wallets.remove(name)?;
        self.secrets.delete_wallet_secrets(&removed.id)?;
        transactions.delete_for_wallet(&removed.id)?;
        tracing::info!(wallet = %name, id = %removed.id, "wallet deleted");
        Ok(())
    }

    /// Challenge positions sized to the wallet's actual phrase length.
    pub fn backup_challenge_for(&self, name: &str) -> eyre::Result<Vec<usize>> {
        let record = self.get(name)?;
        let Some(phrase) = self.secrets.retrieve(&record.id, SecretType::Mnemonic)? else {
            return Err(WalletError::KeyNotFound {
                wallet: name.to_owned(),
                secret_type: SecretType::Mnemonic.as_str().to_owned(),
            }
            .into());
        };
        let phrase_str = std::str::from_utf8(&phrase).context("mnemonic must be utf-8")?;
        let words = phrase_str.split_whitespace().count();
        Ok(Self::backup_challenge(words))
    }

    /// Word positions (1-based) the user must echo to confirm a backup.
    pub fn backup_challenge(word_count: usize) -> Vec<usize> {
        let mut rng = rand::rng();
        let mut picks = vec![];
        while picks.len() < 3.min(word_count) {
            let i = (rng.random::<u32>() as usize % word_count) + 1;
            if !picks.contains(&i) {
                picks.push(i);
            }
        }
        picks.sort_unstable();
        picks
    }

    /// Flip `is_backed_up` once the user proves they wrote the phrase down.
    /// Answers are (1-based position, word) pairs from the challenge.
    pub fn confirm_backup(
        &self,
        name: &str,
        answers: &[(usize, String)],
    ) -> eyre::Result<WalletRecord> {
        let mut record = self.get(name)?;
        let Some(phrase) = self.secrets.retrieve(&record.id, SecretType::Mnemonic)? else {
            return Err(WalletError::KeyNotFound {
                wallet: name.to_owned(),
                secret_type: SecretType::Mnemonic.as_str().to_owned(),
            }
            .into());
        };
        let phrase_str = std::str::from_utf8(&phrase).context("mnemonic must be utf-8")?;
        let words: Vec<&str> = phrase_str.split_whitespace().collect();

        if answers.is_empty() {
            return Err(WalletError::BackupNotConfirmed.into());
        }
        for (pos, word) in answers {
            let ok = pos
                .checked_sub(1)
                .and_then(|i| words.get(i))
                .is_some_and(|w| w.eq_ignore_ascii_case(word.trim()));
            if !ok {
                return Err(WalletError::BackupNotConfirmed.into());
            }
        }

        record.is_backed_up = true;
        self.wallets.update(&record)?;
        Ok(record)
    }
}
