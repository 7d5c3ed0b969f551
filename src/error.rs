use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("Connection failed to {peer}: {reason}")]
    Connection { peer: String, reason: String },

    #[error("Transfer rejected by receiver: {0}")]
    HandshakeRejected(String),

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Transfer truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },

    #[error("File type not allowed: {filename}")]
    PolicyRejected { filename: String },

    #[error("Filesystem error at {}: {reason}", path.display())]
    Filesystem { path: PathBuf, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Timed out after {secs}s while {during}")]
    Timeout { during: String, secs: u64 },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{failed} of {total} file(s) failed to send")]
    BatchFailed { failed: u64, total: u64 },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl ShareError {
    /// Stable short class name, written to the log next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ShareError::Connection { .. } => "ConnectionError",
            ShareError::HandshakeRejected(_) => "HandshakeRejected",
            ShareError::MalformedMetadata(_) => "MalformedMetadata",
            ShareError::Decrypt(_) => "DecryptError",
            ShareError::Truncated { .. } => "TruncatedTransfer",
            ShareError::PolicyRejected { .. } => "PolicyRejected",
            ShareError::Filesystem { .. } => "FilesystemError",
            ShareError::Protocol(_) => "ProtocolError",
            ShareError::Timeout { .. } => "Timeout",
            ShareError::Cancelled => "Cancelled",
            ShareError::Config(_) => "ConfigError",
            ShareError::BatchFailed { .. } => "BatchFailed",
            ShareError::Io { .. } => "IoError",
        }
    }

    /// Returns a user-friendly suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            ShareError::Connection { .. } => {
                Some("Check that the recipient is running `fileshare listen` and the port is reachable.")
            }
            ShareError::HandshakeRejected(_) => {
                Some("The receiver refused the file. Check its allowed file types and encryption settings.")
            }
            ShareError::Decrypt(_) => {
                Some("Both peers must use the same key. Compare keys or passphrases on each side.")
            }
            ShareError::PolicyRejected { .. } => {
                Some("Adjust the allowed extensions with --allow or in config.toml.")
            }
            ShareError::Filesystem { .. } => {
                Some("Check that the path exists and you have read/write permission.")
            }
            ShareError::Config(_) => Some("Check config.toml in the fileshare config directory."),
            ShareError::Timeout { .. } => {
                Some("The peer stopped responding. Raise io_timeout_secs if the link is slow.")
            }
            ShareError::BatchFailed { .. } => {
                Some("See the status lines above or `fileshare history` for each failure.")
            }
            _ => None,
        }
    }

    pub(crate) fn fs(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ShareError::Filesystem {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ShareError {
    fn from(err: toml::de::Error) -> Self {
        ShareError::Config(format!("Invalid config.toml: {}", err))
    }
}

impl From<serde_json::Error> for ShareError {
    fn from(err: serde_json::Error) -> Self {
        ShareError::Config(err.to_string())
    }
}
