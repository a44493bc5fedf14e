use crate::{
    chains::{bitcoin::BitcoinTxPlan, evm::EvmUnsignedTx, solana::SolanaUnsignedTx, Chain, CoinKind},
    errors::WalletError,
    fees::FeePriority,
    paths::BinnaclePaths,
};
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::{fs, path::PathBuf};

/// Chain-reported outcome. `Pending` covers everything from creation until a
/// broadcast verdict; the record, not the process, is the durable truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

/// Chain-specific unsigned material, persisted so signing can happen in a
/// different process than creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "chain", rename_all = "snake_case")]
pub enum TxPayload {
    Bitcoin(BitcoinTxPlan),
    Evm(EvmUnsignedTx),
    Solana(SolanaUnsignedTx),
}

/// One send operation's linear progression. Fields accumulate: the payload
/// at create, signed hex + local hash at sign, the authoritative hash or
/// error text at broadcast. Never re-created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub wallet_id: String,
    pub coin: CoinKind,
    pub chain: Chain,
    pub from_address: String,
    pub to_address: String,
    /// Base-unit amount as a decimal string (survives JSON without u128
    /// precision concerns).
    pub amount_base: String,
    pub fee_base: String,
    pub priority: FeePriority,
    pub status: TxStatus,
    pub payload: TxPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_hex: Option<String>,
    /// Hash/txid computed locally at sign time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    /// Hash/signature reported by the network at broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TransactionRecord {
    pub const fn is_signed(&self) -> bool {
        self.signed_hex.is_some()
    }

    /// Best available identifier: authoritative when present, local
    /// otherwise.
    pub fn hash(&self) -> Option<&str> {
        self.network_hash
            .as_deref()
            .or(self.local_hash.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct TxStore {
    dir: PathBuf,
    history_path: PathBuf,
}

impl TxStore {
    pub fn new(paths: &BinnaclePaths) -> Self {
        Self {
            dir: paths.transactions_dir(),
            history_path: paths.tx_history_path(),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, record: &TransactionRecord) -> eyre::Result<()> {
        let s = serde_json::to_string_pretty(record).context("serialize tx record")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.record_path(&record.id),
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write tx record")?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> eyre::Result<TransactionRecord> {
        let p = self.record_path(id);
        if !p.exists() {
            return Err(WalletError::TransactionNotFound(id.to_owned()).into());
        }
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        let v: TransactionRecord =
            serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
        Ok(v)
    }

    pub fn list(&self) -> eyre::Result<Vec<TransactionRecord>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut out = vec![];
        for entry in fs::read_dir(&self.dir).context("read transactions dir")? {
            let entry = entry.context("read dir entry")?;
            let p = entry.path();
            if p.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
            match serde_json::from_str::<TransactionRecord>(&s) {
                Ok(r) => out.push(r),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "skipping unreadable tx record");
                }
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Records a crash recovery sweep can re-broadcast: still pending, but
    /// the signed bytes already exist on disk.
    pub fn list_pending_signed(&self) -> eyre::Result<Vec<TransactionRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.status == TxStatus::Pending && r.is_signed())
            .collect())
    }

    pub fn delete_for_wallet(&self, wallet_id: &str) -> eyre::Result<()> {
        for r in self.list()? {
            if r.wallet_id == wallet_id {
                let p = self.record_path(&r.id);
                fs::remove_file(&p).with_context(|| format!("remove {}", p.display()))?;
            }
        }
        Ok(())
    }

    /// Append a lifecycle event to the history log (jsonl, private perms).
    pub fn append_history(&self, record: &TransactionRecord, event: &str) -> eyre::Result<()> {
        let entry = serde_json::json!({
            "ts": crate::keystore::utc_now_iso(),
            "event": event,
            "tx_id": record.id,
            "wallet": record.wallet_id,
            "chain": record.chain.as_str(),
            "coin": record.coin.as_str(),
            "status": record.status.as_str(),
            "txid": record.hash(),
            "error": record.error,
        });
        let mut f = crate::fsutil::open_private_append(&self.history_path)?;
        writeln!(f, "{entry}").context("write tx history")?;
        Ok(())
    }
}
