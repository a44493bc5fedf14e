#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]
#![expect(
    clippy::print_stdout,
    reason = "CLI binary; stdout is the user interface"
)]

use binnacle::{
    chains::{bitcoin::EsploraClient, evm::EvmRpc, solana::SolanaRpc, CoinKind},
    config::BinnacleConfig,
    errors::WalletError,
    fees::FeePriority,
    keystore::SecretStore,
    lifecycle::{LifecycleManager, SendRequest},
    paths::BinnaclePaths,
    session::{self, AuthMethods, SessionGate},
    store::ConfigStore,
    txstore::TxStore,
    wallet::{WalletManager, WalletStore},
};
use clap::{Parser, Subcommand, ValueEnum};
use eyre::Context as _;
use secrecy::SecretString;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "binnacle", version, about = "Multi-chain wallet core")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliCoin {
    Btc,
    Eth,
    Sol,
    Usdc,
}

impl From<CliCoin> for CoinKind {
    fn from(v: CliCoin) -> Self {
        match v {
            CliCoin::Btc => Self::Bitcoin,
            CliCoin::Eth => Self::Ethereum,
            CliCoin::Sol => Self::Solana,
            CliCoin::Usdc => Self::UsdcEthereum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliPriority {
    Slow,
    Normal,
    Fast,
}

impl From<CliPriority> for FeePriority {
    fn from(v: CliPriority) -> Self {
        match v {
            CliPriority::Slow => Self::Slow,
            CliPriority::Normal => Self::Normal,
            CliPriority::Fast => Self::Fast,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wallet management.
    Wallet {
        #[command(subcommand)]
        cmd: WalletCmd,
    },
    /// Session security settings.
    Session {
        #[command(subcommand)]
        cmd: SessionCmd,
    },
    /// Show a coin's confirmed balance.
    Balance {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        coin: CliCoin,
    },
    /// Create, sign, and broadcast a send in one step.
    Send {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        coin: CliCoin,
        #[arg(long)]
        to: String,
        /// Decimal amount in whole units (e.g. 0.001).
        #[arg(long)]
        amount: String,
        #[arg(long, value_enum, default_value_t = CliPriority::Normal)]
        priority: CliPriority,
        /// Skip session re-authentication (automated flows).
        #[arg(long, default_value_t = false)]
        bypass_session: bool,
    },
    /// Transaction records.
    Tx {
        #[command(subcommand)]
        cmd: TxCmd,
    },
}

#[derive(Subcommand, Debug)]
enum WalletCmd {
    /// Generate a new wallet; prints the phrase exactly once.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 24)]
        words: usize,
    },
    /// Import an existing phrase (prompted, not echoed).
    Import {
        #[arg(long)]
        name: String,
    },
    List,
    Show {
        #[arg(long)]
        name: String,
    },
    /// Confirm the phrase is written down (word challenge).
    Backup {
        #[arg(long)]
        name: String,
    },
    /// Export a passphrase-encrypted portable backup blob.
    ExportBackup {
        #[arg(long)]
        name: String,
    },
    /// Delete the wallet and everything it owns.
    Delete {
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCmd {
    /// Set or replace the PIN (prompted, not echoed).
    SetPin,
    /// Show configured authentication methods and timeout.
    Status,
}

#[derive(Subcommand, Debug)]
enum TxCmd {
    List,
    Show {
        #[arg(long)]
        id: String,
    },
    /// Re-broadcast pending transactions that already have signed bytes.
    Recover,
    /// Poll the chain for a transaction's authoritative outcome.
    Reconcile {
        #[arg(long)]
        id: String,
    },
}

struct App {
    paths: BinnaclePaths,
    cfg: BinnacleConfig,
    cfg_store: ConfigStore,
    manager: WalletManager,
    txs: TxStore,
}

fn open_app() -> eyre::Result<App> {
    let paths = BinnaclePaths::discover()?;
    paths.ensure_private_dirs()?;
    let cfg_store = ConfigStore::new(&paths);
    let cfg = cfg_store.load_or_init_default()?;
    let secrets = SecretStore::open(paths.clone())?;
    let wallets = WalletStore::new(&paths);
    let manager = WalletManager::new(wallets, secrets);
    let txs = TxStore::new(&paths);
    Ok(App {
        paths,
        cfg,
        cfg_store,
        manager,
        txs,
    })
}

fn session_gate(cfg: &BinnacleConfig) -> Arc<SessionGate> {
    Arc::new(SessionGate::new(
        cfg.security.session_timeout_secs,
        AuthMethods {
            pin_configured: cfg.security.pin_hash.is_some(),
            biometric_enrolled: cfg.security.biometric_enrolled,
            biometric_enabled: cfg.security.biometric_enabled,
        },
    ))
}

fn lifecycle(app: &App) -> eyre::Result<LifecycleManager<EsploraClient, EvmRpc, SolanaRpc>> {
    lifecycle_with(app, session_gate(&app.cfg))
}

fn lifecycle_with(
    app: &App,
    gate: Arc<SessionGate>,
) -> eyre::Result<LifecycleManager<EsploraClient, EvmRpc, SolanaRpc>> {
    let cfg = &app.cfg;
    let bitcoin = EsploraClient::new(cfg.bitcoin_api_base_url())?;
    let evm = EvmRpc::new(
        cfg.evm_rpc_url(),
        cfg.rpc.evm_fallback_rpc_urls.clone(),
        &cfg.http.gas_oracle_base_url,
        cfg.http.gas_oracle_api_key.clone(),
    );
    let solana = SolanaRpc::new(cfg.solana_rpc_url(), cfg.rpc.solana_fallback_rpc_urls.clone());
    Ok(LifecycleManager::new(
        app.manager.clone(),
        app.txs.clone(),
        gate,
        bitcoin,
        evm,
        solana,
        cfg.network_mode,
    ))
}

/// Interactive unlock: verify the PIN against the stored hash and record the
/// authentication on the gate. With no PIN configured the gate is already
/// permissive and nothing is asked.
fn unlock_if_needed(cfg: &BinnacleConfig, gate: &SessionGate) -> eyre::Result<()> {
    if !gate.authentication_required() {
        return Ok(());
    }
    let Some(stored) = &cfg.security.pin_hash else {
        eyre::bail!("authentication required, but no PIN is configured for this terminal");
    };
    let pin = rpassword::prompt_password("PIN: ").context("read pin")?;
    if !session::verify_pin(pin.trim(), stored) {
        return Err(WalletError::AuthenticationRequired.into());
    }
    gate.record_authentication();
    Ok(())
}

fn init_logging(paths: &BinnaclePaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("binnacle.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(tracing_subscriber::EnvFilter::from_default_env());

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let app = open_app()?;
    let _log_guard = init_logging(&app.paths);

    match cli.cmd {
        Command::Wallet { cmd } => wallet_cmd(&app, cmd),
        Command::Session { cmd } => session_cmd(&app, cmd),
        Command::Balance { wallet, coin } => {
            let lc = lifecycle(&app)?;
            let ui = lc.balance(&wallet, coin.into()).await?;
            println!("{ui}");
            Ok(())
        }
        Command::Send {
            wallet,
            coin,
            to,
            amount,
            priority,
            bypass_session,
        } => {
            let gate = session_gate(&app.cfg);
            let lc = lifecycle_with(&app, Arc::clone(&gate))?;
            if !bypass_session {
                unlock_if_needed(&app.cfg, &gate)?;
            }
            let req = SendRequest {
                wallet,
                coin: coin.into(),
                to,
                amount_ui: amount,
                priority: priority.into(),
            };
            let record = lc.send(&req, bypass_session).await?;
            println!(
                "{} {} -> status {}",
                record.id,
                record.hash().unwrap_or("-"),
                record.status.as_str()
            );
            Ok(())
        }
        Command::Tx { cmd } => tx_cmd(&app, cmd).await,
    }
}

fn wallet_cmd(app: &App, cmd: WalletCmd) -> eyre::Result<()> {
    match cmd {
        WalletCmd::Create { name, words } => {
            let lock = app.manager.secrets().acquire_write_lock()?;
            let (record, mnemonic) =
                app.manager
                    .create(&name, words, app.cfg.network_mode)?;
            SecretStore::release_lock(lock)?;
            println!("wallet {} created ({} coins)", record.name, record.coins.len());
            println!();
            println!("Recovery phrase (write it down; it will not be shown again):");
            println!("  {mnemonic}");
            println!();
            println!("Run `binnacle wallet backup --name {name}` once it is written down.");
            Ok(())
        }
        WalletCmd::Import { name } => {
            let phrase =
                rpassword::prompt_password("Recovery phrase: ").context("read phrase")?;
            let lock = app.manager.secrets().acquire_write_lock()?;
            let record = app
                .manager
                .import(&name, &phrase, app.cfg.network_mode)?;
            SecretStore::release_lock(lock)?;
            println!("wallet {} imported", record.name);
            print_addresses(&record);
            Ok(())
        }
        WalletCmd::List => {
            for w in app.manager.store().list()? {
                let backed = if w.is_backed_up { "backed up" } else { "NOT backed up" };
                println!("{}\t{}\t{}", w.name, w.created_at, backed);
            }
            Ok(())
        }
        WalletCmd::Show { name } => {
            let w = app.manager.get(&name)?;
            print_addresses(&w);
            Ok(())
        }
        WalletCmd::Backup { name } => {
            let w = app.manager.get(&name)?;
            let picks = app.manager.backup_challenge_for(&w.name)?;
            let mut answers = vec![];
            for pos in picks {
                let word = rpassword::prompt_password(format!("Word #{pos}: "))
                    .context("read word")?;
                answers.push((pos, word));
            }
            let updated = app.manager.confirm_backup(&w.name, &answers)?;
            println!("backup confirmed for {}", updated.name);
            Ok(())
        }
        WalletCmd::ExportBackup { name } => {
            let w = app.manager.get(&name)?;
            let pass = rpassword::prompt_password("Backup passphrase: ").context("read passphrase")?;
            let blob = app
                .manager
                .secrets()
                .export_backup(&w.id, &SecretString::new(pass.into()))?;
            println!("{blob}");
            Ok(())
        }
        WalletCmd::Delete { name } => {
            let lock = app.manager.secrets().acquire_write_lock()?;
            app.manager.delete(&name, &app.txs)?;
            SecretStore::release_lock(lock)?;
            println!("wallet {name} deleted");
            Ok(())
        }
    }
}

fn print_addresses(w: &binnacle::wallet::WalletRecord) {
    for c in &w.coins {
        println!("{}\t{}\t{}", c.kind.as_str(), c.network, c.address);
    }
}

fn session_cmd(app: &App, cmd: SessionCmd) -> eyre::Result<()> {
    match cmd {
        SessionCmd::SetPin => {
            let pin = rpassword::prompt_password("New PIN: ").context("read pin")?;
            let again = rpassword::prompt_password("Repeat PIN: ").context("read pin")?;
            if pin != again {
                eyre::bail!("PINs do not match");
            }
            if pin.trim().len() < 4 {
                eyre::bail!("PIN must be at least 4 characters");
            }
            let mut cfg = app.cfg.clone();
            cfg.security.pin_hash = Some(session::hash_pin(pin.trim()));
            app.cfg_store.save(&cfg)?;
            println!("PIN set");
            Ok(())
        }
        SessionCmd::Status => {
            let s = &app.cfg.security;
            println!("session timeout: {}s", s.session_timeout_secs);
            println!("pin configured: {}", s.pin_hash.is_some());
            println!(
                "biometric: enrolled={} enabled={}",
                s.biometric_enrolled, s.biometric_enabled
            );
            Ok(())
        }
    }
}

async fn tx_cmd(app: &App, cmd: TxCmd) -> eyre::Result<()> {
    match cmd {
        TxCmd::List => {
            for r in app.txs.list()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    r.id,
                    r.coin.as_str(),
                    r.amount_base,
                    r.status.as_str(),
                    r.hash().unwrap_or("-")
                );
            }
            Ok(())
        }
        TxCmd::Show { id } => {
            let r = app.txs.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&r)?);
            Ok(())
        }
        TxCmd::Recover => {
            let lc = lifecycle(app)?;
            let recovered = lc.recover_pending().await?;
            for r in recovered {
                println!("{}\t{}", r.id, r.status.as_str());
            }
            Ok(())
        }
        TxCmd::Reconcile { id } => {
            let lc = lifecycle(app)?;
            let r = lc.reconcile(&id).await?;
            println!("{}\t{}", r.id, r.status.as_str());
            Ok(())
        }
    }
}
