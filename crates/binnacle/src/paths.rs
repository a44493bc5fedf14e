use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct BinnaclePaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl BinnaclePaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("BINNACLE_DATA_DIR"),
            std::env::var("BINNACLE_CONFIG_DIR"),
        ) {
            let data_dir = PathBuf::from(data_dir);
            let config_dir = PathBuf::from(config_dir);
            let log_file = data_dir.join("binnacle.log.jsonl");
            return Ok(Self {
                config_dir,
                data_dir,
                log_file,
            });
        }

        // Default locations:
        // macOS: ~/Library/Application Support/binnacle
        // Linux: ~/.config/binnacle
        // Windows: %APPDATA%\\binnacle
        let proj =
            ProjectDirs::from("", "", "binnacle").context("failed to resolve project dirs")?;
        let config_dir = proj.config_dir().to_path_buf();
        let data_dir = proj.data_dir().to_path_buf();
        let log_file = data_dir.join("binnacle.log.jsonl");

        Ok(Self {
            config_dir,
            data_dir,
            log_file,
        })
    }

    pub fn ensure_private_dirs(&self) -> eyre::Result<()> {
        crate::fsutil::ensure_private_dir(&self.config_dir)?;
        crate::fsutil::ensure_private_dir(&self.data_dir)?;
        Ok(())
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.config_dir.join("secrets")
    }

    pub fn wallets_dir(&self) -> PathBuf {
        self.config_dir.join("wallets")
    }

    pub fn transactions_dir(&self) -> PathBuf {
        self.data_dir.join("transactions")
    }

    pub fn machine_secret_path(&self) -> PathBuf {
        self.config_dir.join("machine_secret.bin")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("binnacle.lock")
    }

    pub fn tx_history_path(&self) -> PathBuf {
        self.data_dir.join("tx_history.jsonl")
    }
}
