//! Platform-specific config and data directory helpers.
//!
//! Uses the `dirs` crate to resolve platform-appropriate directories:
//! - Linux:   `~/.config/fileshare/` (config), `~/.local/share/fileshare/` (data)
//! - Windows: `%APPDATA%\fileshare\` (config), `%APPDATA%\fileshare\` (data)
//! - macOS:   `~/Library/Application Support/fileshare/` (both)
//!
//! `FILESHARE_CONFIG_DIR` and `FILESHARE_DATA_DIR` override the defaults.

use std::path::PathBuf;

use crate::error::ShareError;

const APP_DIR: &str = "fileshare";

/// Get the config directory, creating it if needed.
pub fn config_dir() -> Result<PathBuf, ShareError> {
    let dir = match std::env::var_os("FILESHARE_CONFIG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::config_dir()
            .ok_or_else(|| ShareError::Config("Could not determine config directory".into()))?
            .join(APP_DIR),
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Get the data directory, creating it if needed.
///
/// Holds transfer history and the daily log files.
pub fn data_dir() -> Result<PathBuf, ShareError> {
    let dir = match std::env::var_os("FILESHARE_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_dir()
            .ok_or_else(|| ShareError::Config("Could not determine data directory".into()))?
            .join(APP_DIR),
    };
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Default location for received files: `~/FileShare/downloads`.
pub fn default_download_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("FileShare")
        .join("downloads")
}
