//! Receiver and sender policy: allowed file types, encryption, destination.
//!
//! Sessions never read shared mutable settings directly. They take a
//! `TransferPolicy` snapshot from a `PolicyProvider` at the points the
//! protocol needs it (batch start on the sender, connection start on the
//! receiver).

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::types::ConflictStrategy;
use crate::config::AppConfig;
use crate::security::crypto::{Cipher, SharedKey};

/// Immutable copy of every setting a session consults.
#[derive(Debug, Clone)]
pub struct TransferPolicy {
    /// Lowercase suffixes with a leading dot; empty allows everything
    pub allowed_extensions: Vec<String>,
    pub download_dir: PathBuf,
    /// Encrypt outgoing files
    pub encrypt: bool,
    pub key: Option<SharedKey>,
    /// Refuse unencrypted incoming files
    pub require_encryption: bool,
    pub on_conflict: ConflictStrategy,
    pub buffer_size: usize,
    pub io_timeout: Option<Duration>,
}

impl TransferPolicy {
    pub fn from_config(config: &AppConfig, key: Option<SharedKey>) -> Self {
        Self {
            allowed_extensions: config.allowed_extensions(),
            download_dir: config.download_dir.clone(),
            encrypt: config.encrypt,
            key,
            require_encryption: config.require_encryption,
            on_conflict: config.on_conflict,
            buffer_size: config.buffer_size,
            io_timeout: config.io_timeout(),
        }
    }

    /// Case-insensitive suffix match against the allowed set.
    pub fn check_file_type(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        let lower = filename.to_lowercase();
        self.allowed_extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn cipher(&self) -> Option<Cipher> {
        self.key.as_ref().map(Cipher::new)
    }
}

/// Normalize user-entered extensions: trim, lowercase, ensure a leading dot,
/// drop empties and duplicates.
pub fn normalize_extensions(raw: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for ext in raw.iter().flat_map(|s| s.split(',')) {
        let ext = ext.trim().to_lowercase();
        if ext.is_empty() || ext == "." {
            continue;
        }
        let ext = if ext.starts_with('.') { ext } else { format!(".{}", ext) };
        if !out.contains(&ext) {
            out.push(ext);
        }
    }
    out
}

/// Supplies the current policy on demand.
pub trait PolicyProvider: Send + Sync {
    fn snapshot(&self) -> TransferPolicy;
}

impl PolicyProvider for TransferPolicy {
    fn snapshot(&self) -> TransferPolicy {
        self.clone()
    }
}

/// Policy shared between the shell and running sessions.
///
/// A single lock with copy-on-read: `snapshot` clones under the read lock
/// and the lock is never held across an await.
#[derive(Debug, Clone)]
pub struct SharedPolicy {
    inner: Arc<RwLock<TransferPolicy>>,
}

impl SharedPolicy {
    pub fn new(policy: TransferPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    /// Apply a change; sessions already running keep their old snapshot.
    #[cfg(test)]
    pub fn update(&self, change: impl FnOnce(&mut TransferPolicy)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        change(&mut guard);
    }
}

impl PolicyProvider for SharedPolicy {
    fn snapshot(&self) -> TransferPolicy {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
