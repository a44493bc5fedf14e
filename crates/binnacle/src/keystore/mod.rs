pub mod crypto;

use crate::{errors::WalletError, paths::BinnaclePaths};
use base64::Engine as _;
use eyre::Context as _;
use fs2::FileExt as _;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::Write as _,
    path::PathBuf,
};
use zeroize::{Zeroize as _, Zeroizing};

/// Discriminates what a stored ciphertext protects. Closed set; the on-disk
/// file name is derived from it, so variants must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    Mnemonic,
    BitcoinKey,
    EvmKey,
    SolanaKey,
    Backup,
}

impl SecretType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mnemonic => "mnemonic",
            Self::BitcoinKey => "bitcoin_key",
            Self::EvmKey => "evm_key",
            Self::SolanaKey => "solana_key",
            Self::Backup => "backup",
        }
    }
}

/// Portable passphrase-wrapped backup payload (base64-encoded JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupBlob {
    v: u8,
    salt_b64: String,
    boxed: crypto::CryptoBox,
}

/// Encrypted storage for wallet secrets, keyed by (wallet id, secret type).
///
/// Ciphertexts live under `secrets/<wallet_id>/<type>.json`; the AES key for
/// each slot is an HKDF subkey of a machine-local master secret. Plaintext is
/// only ever a transient return value: callers zeroize after use, and the
/// `Zeroizing` wrapper covers the drop path.
#[derive(Debug, Clone)]
pub struct SecretStore {
    paths: BinnaclePaths,
}

impl SecretStore {
    pub fn open(paths: BinnaclePaths) -> eyre::Result<Self> {
        paths.ensure_private_dirs()?;
        Ok(Self { paths })
    }

    pub(crate) const fn paths(&self) -> &BinnaclePaths {
        &self.paths
    }

    fn secret_path(&self, wallet_id: &str, secret_type: SecretType) -> PathBuf {
        self.paths
            .secrets_dir()
            .join(wallet_id)
            .join(format!("{}.json", secret_type.as_str()))
    }

    /// Load the machine master secret, creating it on first use. A present
    /// but unreadable/short file means the backing store is compromised or
    /// unavailable: fail closed, never fall back to a weaker scheme.
    fn ensure_master(&self) -> eyre::Result<Zeroizing<[u8; 32]>> {
        let p = self.paths.machine_secret_path();
        if p.exists() {
            return self.load_master();
        }

        let mut secret = Zeroizing::new([0_u8; 32]);
        crypto::fill_random(secret.as_mut_slice());

        if let Some(parent) = p.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        crate::fsutil::write_atomic_restrictive(
            &p,
            secret.as_slice(),
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write machine secret")?;
        Ok(secret)
    }

    fn load_master(&self) -> eyre::Result<Zeroizing<[u8; 32]>> {
        let p = self.paths.machine_secret_path();
        let buf = fs::read(&p).map_err(|e| {
            WalletError::SecureStorageUnavailable(format!("machine secret unreadable: {e}"))
        })?;
        if buf.len() != 32 {
            return Err(WalletError::SecureStorageUnavailable(
                "machine secret has wrong length".into(),
            )
            .into());
        }
        let mut out = Zeroizing::new([0_u8; 32]);
        out.copy_from_slice(&buf);
        Ok(out)
    }

    /// Encrypt and persist, overwriting any prior value for this slot.
    pub fn store(
        &self,
        wallet_id: &str,
        secret_type: SecretType,
        plaintext: &[u8],
    ) -> eyre::Result<()> {
        let master = self.ensure_master()?;
        let mut key = crypto::derive_secret_key(&master, wallet_id, secret_type.as_str())?;
        let boxed = crypto::encrypt(&key, plaintext)?;
        key.zeroize();

        let p = self.secret_path(wallet_id, secret_type);
        let s = serde_json::to_string_pretty(&boxed).context("serialize secret box")?;
        crate::fsutil::write_string_atomic_restrictive(&p, &s, crate::fsutil::MODE_FILE_PRIVATE)
            .with_context(|| format!("write {}", p.display()))?;
        Ok(())
    }

    /// Decrypt a stored secret, or `None` if the slot was never written.
    pub fn retrieve(
        &self,
        wallet_id: &str,
        secret_type: SecretType,
    ) -> eyre::Result<Option<Zeroizing<Vec<u8>>>> {
        let p = self.secret_path(wallet_id, secret_type);
        if !p.exists() {
            return Ok(None);
        }
        let master = self.load_master()?;
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let boxed: crypto::CryptoBox =
            serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
        let mut key = crypto::derive_secret_key(&master, wallet_id, secret_type.as_str())?;
        let pt = crypto::decrypt(&key, &boxed)?;
        key.zeroize();
        Ok(Some(Zeroizing::new(pt)))
    }

    pub fn delete_wallet_secrets(&self, wallet_id: &str) -> eyre::Result<()> {
        let dir = self.paths.secrets_dir().join(wallet_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        Ok(())
    }

    /// Full reset: every ciphertext and the master key reference are erased.
    /// Irreversible; remaining ciphertexts anywhere else become garbage.
    pub fn clear_all(&self) -> eyre::Result<()> {
        let dir = self.paths.secrets_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        }
        let p = self.paths.machine_secret_path();
        if p.exists() {
            fs::remove_file(&p).with_context(|| format!("remove {}", p.display()))?;
        }
        Ok(())
    }

    /// Exclusive lock serialising store mutation across processes. Fails fast
    /// with `StoreBusy` rather than blocking inside a wallet operation.
    pub fn acquire_write_lock(&self) -> eyre::Result<File> {
        let p = self.paths.lock_path();
        if let Some(parent) = p.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let f = {
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .mode(0o600)
                    .open(&p)
                    .context("open lock file")?
            }
            #[cfg(not(unix))]
            {
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(&p)
                    .context("open lock file")?
            }
        };
        match f.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(WalletError::StoreBusy.into());
            }
            Err(e) => return Err(eyre::Report::new(e).wrap_err("lock exclusive")),
        }
        Ok(f)
    }

    pub fn release_lock(mut f: File) -> eyre::Result<()> {
        fs2::FileExt::unlock(&f).context("unlock")?;
        f.flush().ok();
        Ok(())
    }

    /// Wrap the wallet's mnemonic under a user passphrase for portable
    /// export. The blob is also persisted under the `Backup` slot so a later
    /// device migration can re-read it locally.
    pub fn export_backup(
        &self,
        wallet_id: &str,
        passphrase: &SecretString,
    ) -> eyre::Result<String> {
        let Some(mnemonic) = self.retrieve(wallet_id, SecretType::Mnemonic)? else {
            return Err(WalletError::KeyNotFound {
                wallet: wallet_id.to_owned(),
                secret_type: SecretType::Mnemonic.as_str().to_owned(),
            }
            .into());
        };

        let salt = crypto::random_salt16();
        let mut key = crypto::derive_passphrase_key(passphrase, &salt)?;
        let boxed = crypto::encrypt(&key, &mnemonic)?;
        key.zeroize();

        let blob = BackupBlob {
            v: 1,
            salt_b64: base64::engine::general_purpose::STANDARD.encode(salt),
            boxed,
        };
        let json = serde_json::to_vec(&blob).context("serialize backup blob")?;
        self.store(wallet_id, SecretType::Backup, &json)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Recover the mnemonic bytes from a portable backup string.
    pub fn decode_backup(
        blob_b64: &str,
        passphrase: &SecretString,
    ) -> eyre::Result<Zeroizing<Vec<u8>>> {
        let json = base64::engine::general_purpose::STANDARD
            .decode(blob_b64.trim())
            .context("decode backup blob")?;
        let blob: BackupBlob = serde_json::from_slice(&json).context("parse backup blob")?;
        if blob.v != 1 {
            eyre::bail!("unsupported backup version: {}", blob.v);
        }
        let salt_bytes = base64::engine::general_purpose::STANDARD
            .decode(&blob.salt_b64)
            .context("decode backup salt")?;
        if salt_bytes.len() != 16 {
            eyre::bail!("invalid backup salt length");
        }
        let mut salt = [0_u8; 16];
        salt.copy_from_slice(&salt_bytes);

        let mut key = crypto::derive_passphrase_key(passphrase, &salt)?;
        let pt = crypto::decrypt(&key, &blob.boxed)?;
        key.zeroize();
        Ok(Zeroizing::new(pt))
    }
}

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> eyre::Result<(tempfile::TempDir, SecretStore)> {
        let dir = tempfile::tempdir()?;
        let paths = BinnaclePaths {
            config_dir: dir.path().join("config"),
            data_dir: dir.path().join("data"),
            log_file: dir.path().join("data").join("log.jsonl"),
        };
        let store = SecretStore::open(paths)?;
        Ok((dir, store))
    }

    #[test]
    fn store_retrieve_roundtrip_and_absent_is_none() -> eyre::Result<()> {
        let (_dir, store) = test_store()?;
        assert!(store.retrieve("w1", SecretType::Mnemonic)?.is_none());

        store.store("w1", SecretType::Mnemonic, b"twelve words")?;
        let got = store
            .retrieve("w1", SecretType::Mnemonic)?
            .ok_or_else(|| eyre::eyre!("missing secret"))?;
        assert_eq!(got.as_slice(), b"twelve words");

        // Same wallet, different type: independent slot.
        assert!(store.retrieve("w1", SecretType::EvmKey)?.is_none());
        Ok(())
    }

    #[test]
    fn store_overwrites_prior_value() -> eyre::Result<()> {
        let (_dir, store) = test_store()?;
        store.store("w1", SecretType::BitcoinKey, b"old")?;
        store.store("w1", SecretType::BitcoinKey, b"new")?;
        let got = store
            .retrieve("w1", SecretType::BitcoinKey)?
            .ok_or_else(|| eyre::eyre!("missing secret"))?;
        assert_eq!(got.as_slice(), b"new");
        Ok(())
    }

    #[test]
    fn clear_all_is_irreversible() -> eyre::Result<()> {
        let (_dir, store) = test_store()?;
        store.store("w1", SecretType::Mnemonic, b"secret")?;
        store.clear_all()?;
        assert!(store.retrieve("w1", SecretType::Mnemonic)?.is_none());
        assert!(!store.paths().machine_secret_path().exists());
        Ok(())
    }

    #[test]
    fn corrupt_master_fails_closed() -> eyre::Result<()> {
        let (_dir, store) = test_store()?;
        store.store("w1", SecretType::Mnemonic, b"secret")?;
        std::fs::write(store.paths().machine_secret_path(), b"short")?;
        let err = store
            .retrieve("w1", SecretType::Mnemonic)
            .err()
            .ok_or_else(|| eyre::eyre!("expected failure"))?;
        assert!(err.to_string().contains("secure storage unavailable"));
        Ok(())
    }

    #[test]
    fn backup_export_roundtrip() -> eyre::Result<()> {
        let (_dir, store) = test_store()?;
        store.store("w1", SecretType::Mnemonic, b"phrase words here")?;
        let pass = SecretString::new("hunter2 but longer".to_owned().into());
        let blob = store.export_backup("w1", &pass)?;

        let pt = SecretStore::decode_backup(&blob, &pass)?;
        assert_eq!(pt.as_slice(), b"phrase words here");

        let wrong = SecretString::new("wrong".to_owned().into());
        assert!(SecretStore::decode_backup(&blob, &wrong).is_err());

        // The blob is also stored under the Backup slot.
        assert!(store.retrieve("w1", SecretType::Backup)?.is_some());
        Ok(())
    }

    #[test]
    fn write_lock_excludes_second_holder() -> eyre::Result<()> {
        let (_dir, store) = test_store()?;
        let lock = store.acquire_write_lock()?;
        let second = store.acquire_write_lock();
        assert!(second.is_err());
        SecretStore::release_lock(lock)?;
        let third = store.acquire_write_lock()?;
        SecretStore::release_lock(third)?;
        Ok(())
    }
}
