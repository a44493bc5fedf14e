use std::process::Command;

use eyre::Context as _;

fn binnacle() -> std::path::PathBuf {
    assert_cmd::cargo::cargo_bin!("binnacle").to_path_buf()
}

#[test]
fn wallet_create_list_show_roundtrip() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;
    let envs = [
        ("BINNACLE_CONFIG_DIR", cfg_dir.path().to_path_buf()),
        ("BINNACLE_DATA_DIR", data_dir.path().to_path_buf()),
    ];

    let out = Command::new(binnacle())
        .envs(envs.iter().cloned())
        .args(["wallet", "create", "--name", "smoke", "--words", "12"])
        .output()
        .context("run wallet create")?;
    assert!(
        out.status.success(),
        "create exited non-zero: stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Recovery phrase"));

    let out = Command::new(binnacle())
        .envs(envs.iter().cloned())
        .args(["wallet", "list"])
        .output()
        .context("run wallet list")?;
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("smoke"));
    assert!(stdout.contains("NOT backed up"));

    let out = Command::new(binnacle())
        .envs(envs.iter().cloned())
        .args(["wallet", "show", "--name", "smoke"])
        .output()
        .context("run wallet show")?;
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    // One line per coin: btc, eth, sol, usdc.
    for coin in ["btc", "eth", "sol", "usdc"] {
        assert!(stdout.contains(coin), "missing {coin} in: {stdout}");
    }
    Ok(())
}

#[test]
fn tx_list_is_empty_on_fresh_dirs() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = Command::new(binnacle())
        .env("BINNACLE_CONFIG_DIR", cfg_dir.path())
        .env("BINNACLE_DATA_DIR", data_dir.path())
        .args(["tx", "list"])
        .output()
        .context("run tx list")?;
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
    Ok(())
}

#[test]
fn session_status_reports_defaults() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = Command::new(binnacle())
        .env("BINNACLE_CONFIG_DIR", cfg_dir.path())
        .env("BINNACLE_DATA_DIR", data_dir.path())
        .args(["session", "status"])
        .output()
        .context("run session status")?;
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("session timeout: 300s"));
    assert!(stdout.contains("pin configured: false"));
    Ok(())
}

#[test]
fn unknown_wallet_fails_with_domain_error() -> eyre::Result<()> {
    let cfg_dir = tempfile::tempdir()?;
    let data_dir = tempfile::tempdir()?;

    let out = Command::new(binnacle())
        .env("BINNACLE_CONFIG_DIR", cfg_dir.path())
        .env("BINNACLE_DATA_DIR", data_dir.path())
        .args(["wallet", "show", "--name", "ghost"])
        .output()
        .context("run wallet show")?;
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("wallet not found"), "stderr: {stderr}");
    Ok(())
}
