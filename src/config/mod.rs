//! Application configuration backed by `config.toml`.
//!
//! Every field has a default, so a missing or partial file is valid. CLI
//! flags are layered on top by the command handlers in `main.rs`.

pub mod paths;
pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ShareError;
use crate::net::protocol::{BUFFER_SIZE, MAX_FRAME_SIZE, NONCE_LEN, TAG_LEN};
use crate::net::receiver::DRAIN_TIMEOUT;
use crate::policy::normalize_extensions;
use types::ConflictStrategy;

/// Default TCP port peers listen on.
pub const DEFAULT_PORT: u16 = 5000;

/// Serialized `config.toml` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the listener binds to.
    pub host: String,
    pub port: u16,
    /// Plaintext bytes per body chunk.
    pub buffer_size: usize,
    /// Allowed extensions such as `.txt`; empty allows everything.
    pub allowed_extensions: Vec<String>,
    /// Encrypt outgoing files.
    pub encrypt: bool,
    /// Base64-encoded 32-byte shared key.
    pub key: Option<String>,
    /// Refuse unencrypted incoming files.
    pub require_encryption: bool,
    pub download_dir: PathBuf,
    /// Per socket operation; 0 disables.
    pub io_timeout_secs: u64,
    /// How long `listen` waits for in-flight transfers on shutdown.
    pub shutdown_drain_secs: u64,
    pub history_limit: usize,
    pub on_conflict: ConflictStrategy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            buffer_size: BUFFER_SIZE,
            allowed_extensions: Vec::new(),
            encrypt: true,
            key: None,
            require_encryption: false,
            download_dir: paths::default_download_dir(),
            io_timeout_secs: 60,
            shutdown_drain_secs: DRAIN_TIMEOUT.as_secs(),
            history_limit: 1000,
            on_conflict: ConflictStrategy::Overwrite,
        }
    }
}

impl AppConfig {
    /// Load `config.toml` from the given config directory.
    ///
    /// Returns the defaults if the file does not exist.
    pub fn load(config_dir: &Path) -> Result<Self, ShareError> {
        let path = config_dir.join("config.toml");
        let config: AppConfig = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)?
        } else {
            AppConfig::default()
        };
        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ShareError> {
        if self.buffer_size == 0 {
            return Err(ShareError::Config("buffer_size must be greater than 0".into()));
        }
        if self.buffer_size + NONCE_LEN + TAG_LEN > MAX_FRAME_SIZE {
            return Err(ShareError::Config(format!(
                "buffer_size {} exceeds the maximum of {}",
                self.buffer_size,
                MAX_FRAME_SIZE - NONCE_LEN - TAG_LEN
            )));
        }
        if self.history_limit == 0 {
            return Err(ShareError::Config("history_limit must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_secs > 0).then(|| Duration::from_secs(self.io_timeout_secs))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }

    pub fn allowed_extensions(&self) -> Vec<String> {
        normalize_extensions(&self.allowed_extensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.buffer_size, 8192);
        assert!(config.encrypt);
        assert!(config.allowed_extensions.is_empty());
        assert_eq!(config.io_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.drain_timeout(), DRAIN_TIMEOUT);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "port = 6000\nallowed_extensions = [\"TXT\", \".pdf\"]\non_conflict = \"rename\"\n",
        )
        .unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.on_conflict, ConflictStrategy::Rename);
        assert_eq!(config.allowed_extensions(), vec![".txt", ".pdf"]);
    }

    #[test]
    fn drain_timeout_is_configurable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "shutdown_drain_secs = 3\n").unwrap();
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.drain_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = AppConfig {
            io_timeout_secs: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.io_timeout(), None);
    }

    #[test]
    fn oversized_buffer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "buffer_size = 4194304\n").unwrap();
        let err = AppConfig::load(dir.path()).unwrap_err();
        assert!(format!("{}", err).contains("buffer_size"));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "port = \"not a number\"").unwrap();
        let err = AppConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ShareError::Config(_)));
    }
}
