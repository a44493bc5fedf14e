use crate::chains::BitcoinNetwork;
use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath as BtcDerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{
    address::KnownHrp, Address as BtcAddress, CompressedPublicKey, Network as BtcNetwork,
    PrivateKey as BtcPrivateKey,
};
use eyre::Context as _;
use solana_derivation_path::DerivationPath as SolanaDerivationPath;
use solana_keypair::{seed_derivable::keypair_from_seed_and_derivation_path, Keypair};
use solana_seed_phrase::generate_seed_from_seed_phrase_and_passphrase;
use solana_signer::Signer as _;
use zeroize::Zeroizing;

/// Output of one chain's key factory: everything the wallet record needs,
/// plus the raw signing secret. The secret is wrapped in `Zeroizing` and must
/// not outlive the operation that requested it.
pub struct DerivedKey {
    pub address: String,
    pub public_key: String,
    pub derivation_path: String,
    /// Account-level extended public key (UTXO chain only, watch-only use).
    pub xpub: Option<String>,
    pub secret: Zeroizing<Vec<u8>>,
}

/// Standard 64-byte BIP-39 seed. No passphrase support beyond the empty
/// string; recovery depends on this staying fixed.
pub fn derive_seed(mnemonic: &Mnemonic) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed_normalized(""))
}

/// BIP-84 (native segwit): address key at m/84'/coin'/0'/0/0, plus the
/// account-level xpub.
pub fn derive_bitcoin(mnemonic: &Mnemonic, network: BitcoinNetwork) -> eyre::Result<DerivedKey> {
    let seed = derive_seed(mnemonic);
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(network.to_lib(), seed.as_slice()).context("btc master xpriv")?;

    let coin = network.coin_type();
    let account_path: BtcDerivationPath = format!("m/84'/{coin}'/0'")
        .parse()
        .context("parse btc account path")?;
    let account_xpriv = master
        .derive_priv(&secp, &account_path)
        .context("derive btc account")?;
    let xpub = Xpub::from_priv(&secp, &account_xpriv);

    let child_path: BtcDerivationPath = "m/0/0".parse().context("parse btc child path")?;
    let child = account_xpriv
        .derive_priv(&secp, &child_path)
        .context("derive btc child")?;

    let sk = BtcPrivateKey::new(child.private_key, network.to_lib());
    let pk = sk.public_key(&secp);
    let cpk = CompressedPublicKey::try_from(pk).context("btc compressed pubkey")?;
    let address = BtcAddress::p2wpkh(&cpk, known_hrp(network.to_lib()));

    Ok(DerivedKey {
        address: address.to_string(),
        public_key: cpk.to_string(),
        derivation_path: format!("m/84'/{coin}'/0'/0/0"),
        xpub: Some(xpub.to_string()),
        secret: Zeroizing::new(child.private_key.secret_bytes().to_vec()),
    })
}

/// BIP-44 EVM account 0: m/44'/60'/0'/0/0, checksummed hex address.
pub fn derive_evm(mnemonic: &Mnemonic) -> eyre::Result<DerivedKey> {
    let phrase = Zeroizing::new(mnemonic.to_string());
    let signer = MnemonicBuilder::<English>::default()
        .phrase(phrase.as_str())
        .index(0)
        .context("evm index")?
        .build()
        .context("build evm signer")?;

    let public_key = hex::encode(signer.credential().verifying_key().to_sec1_bytes());

    Ok(DerivedKey {
        address: signer.address().to_checksum(None),
        public_key,
        derivation_path: "m/44'/60'/0'/0/0".to_owned(),
        xpub: None,
        secret: Zeroizing::new(signer.credential().to_bytes().to_vec()),
    })
}

/// Solana bip44 path m/44'/501'/0'/0'; the address is the base58 Ed25519
/// pubkey. The stored secret is the 64-byte keypair encoding.
pub fn derive_solana(mnemonic: &Mnemonic) -> eyre::Result<DerivedKey> {
    let phrase = Zeroizing::new(mnemonic.to_string());
    let seed = Zeroizing::new(generate_seed_from_seed_phrase_and_passphrase(
        phrase.as_str(),
        "",
    ));
    let path = SolanaDerivationPath::new_bip44(Some(0), Some(0));
    let kp = keypair_from_seed_and_derivation_path(seed.as_slice(), Some(path))
        .map_err(|e| eyre::eyre!("derive solana keypair: {e}"))?;
    let address = kp.pubkey().to_string();

    Ok(DerivedKey {
        address: address.clone(),
        public_key: address,
        derivation_path: "m/44'/501'/0'/0'".to_owned(),
        xpub: None,
        secret: Zeroizing::new(kp.to_bytes().to_vec()),
    })
}

pub const fn known_hrp(network: BtcNetwork) -> KnownHrp {
    match network {
        BtcNetwork::Bitcoin => KnownHrp::Mainnet,
        BtcNetwork::Regtest => KnownHrp::Regtest,
        BtcNetwork::Testnet | BtcNetwork::Testnet4 | BtcNetwork::Signet => KnownHrp::Testnets,
    }
}

/// Restore a Bitcoin signing key from stored secret bytes.
pub fn bitcoin_key_from_secret(
    secret: &[u8],
    network: BitcoinNetwork,
) -> eyre::Result<BtcPrivateKey> {
    let sk = bitcoin::secp256k1::SecretKey::from_slice(secret)
        .map_err(|_| crate::errors::WalletError::InvalidKey)?;
    Ok(BtcPrivateKey::new(sk, network.to_lib()))
}

/// P2WPKH address for a restored key; used to cross-check the signer against
/// the wallet's recorded coin address before anything is signed.
pub fn bitcoin_address_for_key(
    key: &BtcPrivateKey,
    network: BitcoinNetwork,
) -> eyre::Result<String> {
    let secp = Secp256k1::new();
    let cpk =
        CompressedPublicKey::try_from(key.public_key(&secp)).context("btc compressed pubkey")?;
    Ok(BtcAddress::p2wpkh(&cpk, known_hrp(network.to_lib())).to_string())
}

pub fn evm_signer_from_secret(secret: &[u8]) -> eyre::Result<PrivateKeySigner> {
    PrivateKeySigner::from_slice(secret).map_err(|_| crate::errors::WalletError::InvalidKey.into())
}

pub fn solana_keypair_from_secret(secret: &[u8]) -> eyre::Result<Keypair> {
    Keypair::try_from(secret).map_err(|_| crate::errors::WalletError::InvalidKey.into())
}
