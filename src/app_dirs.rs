use std::path::PathBuf;

use anyhow::{Context, Result};

pub const CONFIG_FILENAME: &str = "NetSpeedTray_Config.json";
pub const DB_FILENAME: &str = "speed_history.db";
pub const LOG_BASENAME: &str = "netspeedtray";

/// Resolves the per-user application data directory.
///
/// `NETSPEEDTRAY_DATA_DIR` overrides everything (used by tests and portable
/// deployments). Otherwise `%APPDATA%\NetSpeedTray` on Windows and
/// `$XDG_DATA_HOME/netspeedtray` (falling back to `~/.local/share`) elsewhere.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("NETSPEEDTRAY_DATA_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    #[cfg(windows)]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA is not set")?;
        Ok(PathBuf::from(appdata).join("NetSpeedTray"))
    }

    #[cfg(not(windows))]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            if !xdg.is_empty() {
                return Ok(PathBuf::from(xdg).join("netspeedtray"));
            }
        }
        let home = std::env::var("HOME").context("HOME is not set")?;
        Ok(PathBuf::from(home).join(".local/share/netspeedtray"))
    }
}

/// Creates the data directory if missing and returns it.
pub fn ensure_data_dir() -> Result<PathBuf> {
    let dir = data_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(CONFIG_FILENAME))
}

pub fn db_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(DB_FILENAME))
}
