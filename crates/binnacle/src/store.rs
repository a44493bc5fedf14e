use crate::{
    config::{BinnacleConfig, NetworkMode},
    paths::BinnaclePaths,
};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

fn parse_network_mode_env(s: &str) -> Option<NetworkMode> {
    match s.trim().to_lowercase().as_str() {
        "mainnet" | "main" | "prod" | "production" => Some(NetworkMode::Mainnet),
        "testnet" | "test" | "dev" | "devnet" => Some(NetworkMode::Testnet),
        _ => None,
    }
}

/// Apply environment variable overrides (endpoints, network mode, timeout).
fn apply_env_overrides(cfg: &mut BinnacleConfig) {
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("BINNACLE_BITCOIN_API_BASE_URL_MAINNET", |v| {
        v.clone_into(&mut cfg.http.bitcoin_api_base_url_mainnet);
    });
    apply_env("BINNACLE_BITCOIN_API_BASE_URL_TESTNET", |v| {
        v.clone_into(&mut cfg.http.bitcoin_api_base_url_testnet);
    });
    apply_env("BINNACLE_GAS_ORACLE_BASE_URL", |v| {
        v.clone_into(&mut cfg.http.gas_oracle_base_url);
    });
    apply_env("BINNACLE_GAS_ORACLE_API_KEY", |v| {
        cfg.http.gas_oracle_api_key = Some(v.to_owned());
    });
    apply_env("BINNACLE_EVM_RPC_URL_MAINNET", |v| {
        v.clone_into(&mut cfg.rpc.evm_rpc_url_mainnet);
    });
    apply_env("BINNACLE_EVM_RPC_URL_SEPOLIA", |v| {
        v.clone_into(&mut cfg.rpc.evm_rpc_url_sepolia);
    });
    apply_env("BINNACLE_SOLANA_RPC_URL_MAINNET", |v| {
        v.clone_into(&mut cfg.rpc.solana_rpc_url_mainnet);
    });
    apply_env("BINNACLE_SOLANA_RPC_URL_DEVNET", |v| {
        v.clone_into(&mut cfg.rpc.solana_rpc_url_devnet);
    });
    if let Some(m) = std::env::var("BINNACLE_NETWORK_MODE")
        .ok()
        .and_then(|v| parse_network_mode_env(&v))
    {
        cfg.network_mode = m;
    }
    if let Ok(v) = std::env::var("BINNACLE_SESSION_TIMEOUT_SECS") {
        if let Ok(n) = v.trim().parse::<u64>() {
            if n > 0 {
                cfg.security.session_timeout_secs = n;
            }
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &BinnaclePaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn load_or_init_default(&self) -> eyre::Result<BinnacleConfig> {
        if !self.path.exists() {
            let mut cfg = BinnacleConfig::default();
            apply_env_overrides(&mut cfg);
            self.save(&cfg)?;
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: BinnacleConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &BinnacleConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::fsutil::ensure_private_dir(parent)?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_string_atomic_restrictive(
            &self.path,
            &s,
            crate::fsutil::MODE_FILE_PRIVATE,
        )
        .context("write config.toml")?;
        Ok(())
    }
}
