//! Binnacle: a multi-chain wallet core.
//!
//! One BIP-39 phrase derives independent keys for Bitcoin (BIP-84 P2WPKH),
//! an EVM chain (BIP-44 secp256k1, native + ERC-20), and Solana (Ed25519).
//! Secrets live behind an AES-256-GCM store keyed off a machine-local master
//! secret; access is gated by a timeout session with PIN/biometric
//! re-authentication. Sends move through an explicit create → sign →
//! broadcast state machine with every transition persisted.

pub mod amount;
pub mod chains;
pub mod config;
pub mod derivation;
pub mod errors;
pub mod fees;
pub mod fsutil;
pub mod keystore;
pub mod lifecycle;
pub mod mnemonic;
pub mod paths;
pub mod retry;
pub mod session;
pub mod store;
pub mod txstore;
pub mod wallet;
