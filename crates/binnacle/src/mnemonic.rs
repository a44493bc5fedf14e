use bip39::{Language, Mnemonic};
use eyre::Context as _;
use sha2::{Digest as _, Sha256};

/// Word counts accepted for generation. Each maps to 128–256 bits of entropy
/// in 32-bit steps (12 words = 128 bits, 24 words = 256 bits).
pub const VALID_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// Generate a fresh BIP-39 phrase from CSPRNG entropy. The only failure mode
/// is an unusable system RNG, which is fatal for a wallet.
pub fn generate(word_count: usize) -> eyre::Result<Mnemonic> {
    if !VALID_WORD_COUNTS.contains(&word_count) {
        eyre::bail!("unsupported word count {word_count}; expected one of {VALID_WORD_COUNTS:?}");
    }
    Mnemonic::generate_in(Language::English, word_count).context("generate mnemonic")
}

/// Checksum-validate an imported phrase. Never errors: malformed input is
/// simply not a valid mnemonic.
pub fn validate(phrase: &str) -> bool {
    Mnemonic::parse_in_normalized(Language::English, phrase).is_ok()
}

pub fn parse(phrase: &str) -> eyre::Result<Mnemonic> {
    Mnemonic::parse_in_normalized(Language::English, phrase.trim()).context("parse mnemonic")
}

/// Non-reversible fingerprint of a phrase, safe to persist alongside wallet
/// metadata. The phrase itself only ever lives in the encrypted secret store.
pub fn fingerprint(mnemonic: &Mnemonic) -> String {
    let mut h = Sha256::new();
    h.update(mnemonic.to_string().as_bytes());
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn generates_each_supported_word_count() -> eyre::Result<()> {
        for n in VALID_WORD_COUNTS {
            let m = generate(n)?;
            assert_eq!(m.word_count(), n);
            assert!(validate(&m.to_string()));
        }
        Ok(())
    }

    #[test]
    fn rejects_unsupported_word_count() {
        assert!(generate(13).is_err());
        assert!(generate(0).is_err());
    }

    #[test]
    fn validate_is_total_over_garbage() {
        assert!(!validate(""));
        assert!(!validate("not a mnemonic at all"));
        // Right words, wrong checksum.
        assert!(!validate(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon"
        ));
        assert!(validate(TEST_PHRASE));
    }

    #[test]
    fn fingerprint_is_stable_and_opaque() -> eyre::Result<()> {
        let m = parse(TEST_PHRASE)?;
        let f1 = fingerprint(&m);
        let f2 = fingerprint(&m);
        assert_eq!(f1, f2);
        assert_eq!(f1.len(), 64);
        assert!(!f1.contains("abandon"));

        let other = generate(12)?;
        assert_ne!(fingerprint(&other), f1);
        Ok(())
    }
}
