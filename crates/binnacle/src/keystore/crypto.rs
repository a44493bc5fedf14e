use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{
    password_hash::{PasswordHasher as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use base64::Engine as _;
use eyre::Context as _;
use hkdf::Hkdf;
use rand::Rng as _;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// One encrypted secret on disk: AES-256-GCM ciphertext plus the fresh
/// random nonce it was sealed with. Versioned so the box format can evolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoBox {
    pub v: u8,
    pub nonce_b64: String,
    pub ct_b64: String,
}

pub fn fill_random(buf: &mut [u8]) {
    let mut rng = rand::rng();
    rng.fill_bytes(buf);
}

pub fn random_salt16() -> [u8; 16] {
    let mut s = [0_u8; 16];
    fill_random(&mut s);
    s
}

/// Per-secret AES key: HKDF-SHA256 over the machine master key, bound to the
/// wallet id and secret type so no two stored secrets share a key.
pub fn derive_secret_key(
    master: &[u8; 32],
    wallet_id: &str,
    secret_type: &str,
) -> eyre::Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let info = format!("binnacle:{wallet_id}:{secret_type}");
    let mut out = [0_u8; 32];
    hk.expand(info.as_bytes(), &mut out)
        .map_err(|e| eyre::eyre!("hkdf expand: {e}"))?;
    Ok(out)
}

/// Argon2id key from a user passphrase; used for portable backup export.
/// Parameters are frozen so stored backups stay decryptable across
/// dependency updates.
pub fn derive_passphrase_key(
    passphrase: &SecretString,
    salt16: &[u8; 16],
) -> eyre::Result<[u8; 32]> {
    let params =
        Params::new(19 * 1024, 2, 1, Some(32)).map_err(|e| eyre::eyre!("argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::encode_b64(salt16).map_err(|e| eyre::eyre!("encode salt: {e}"))?;
    let mut out = [0_u8; 32];

    let hash = argon2
        .hash_password(passphrase.expose_secret().as_bytes(), &salt)
        .map_err(|e| eyre::eyre!("argon2 hash: {e}"))?;
    let bytes = hash
        .hash
        .ok_or_else(|| eyre::eyre!("argon2 missing hash"))?;
    let raw = bytes.as_bytes();
    let Some(prefix) = raw.get(..32) else {
        eyre::bail!("argon2 hash too short");
    };
    out.copy_from_slice(prefix);
    Ok(out)
}

pub fn encrypt(key32: &[u8; 32], plaintext: &[u8]) -> eyre::Result<CryptoBox> {
    let cipher = Aes256Gcm::new_from_slice(key32).context("aes init")?;
    let mut nonce = [0_u8; 12];
    fill_random(&mut nonce);
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;

    Ok(CryptoBox {
        v: 1,
        nonce_b64: base64::engine::general_purpose::STANDARD.encode(nonce),
        ct_b64: base64::engine::general_purpose::STANDARD.encode(ct),
    })
}

pub fn decrypt(key32: &[u8; 32], b: &CryptoBox) -> eyre::Result<Vec<u8>> {
    if b.v != 1 {
        eyre::bail!("unsupported CryptoBox version: {}", b.v);
    }
    let cipher = Aes256Gcm::new_from_slice(key32).context("aes init")?;
    let nonce = base64::engine::general_purpose::STANDARD
        .decode(&b.nonce_b64)
        .context("decode nonce")?;
    if nonce.len() != 12 {
        eyre::bail!("invalid nonce length");
    }
    let ct = base64::engine::general_purpose::STANDARD
        .decode(&b.ct_b64)
        .context("decode ciphertext")?;

    let pt = cipher
        .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
        .map_err(|e| eyre::eyre!("aes decrypt: {e}"))?;
    Ok(pt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    #[test]
    fn roundtrip_restores_plaintext() -> eyre::Result<()> {
        let key = [9_u8; 32];
        let pt = b"mnemonic material".to_vec();
        let boxv = encrypt(&key, &pt).context("encrypt")?;
        let out = decrypt(&key, &boxv).context("decrypt")?;
        assert_eq!(out, pt);
        Ok(())
    }

    #[test]
    fn nonce_is_fresh_per_encryption() -> eyre::Result<()> {
        let key = [9_u8; 32];
        let pt = b"same plaintext";
        let a = encrypt(&key, pt)?;
        let b = encrypt(&key, pt)?;
        assert_ne!(a.nonce_b64, b.nonce_b64);
        assert_ne!(a.ct_b64, b.ct_b64);
        Ok(())
    }

    #[test]
    fn wrong_key_fails_closed() -> eyre::Result<()> {
        let key = [9_u8; 32];
        let boxv = encrypt(&key, b"secret")?;
        let wrong = [10_u8; 32];
        let err = decrypt(&wrong, &boxv)
            .err()
            .context("wrong key must fail")?;
        assert!(err.to_string().contains("aes decrypt"));
        Ok(())
    }

    #[test]
    fn secret_keys_differ_by_wallet_and_type() -> eyre::Result<()> {
        let master = [3_u8; 32];
        let a = derive_secret_key(&master, "w1", "mnemonic")?;
        let b = derive_secret_key(&master, "w1", "bitcoin_key")?;
        let c = derive_secret_key(&master, "w2", "mnemonic")?;
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, derive_secret_key(&master, "w1", "mnemonic")?);
        Ok(())
    }

    #[test]
    fn passphrase_key_is_deterministic_for_same_salt() -> eyre::Result<()> {
        let passphrase = SecretString::new("correct horse battery staple".to_owned().into());
        let salt = [1_u8; 16];
        let k1 = derive_passphrase_key(&passphrase, &salt)?;
        let k2 = derive_passphrase_key(&passphrase, &salt)?;
        assert_eq!(k1, k2);
        let other_salt = [2_u8; 16];
        assert_ne!(derive_passphrase_key(&passphrase, &other_salt)?, k1);
        Ok(())
    }
}
