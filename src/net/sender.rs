//! TCP client for sending files to a listening peer.
//!
//! One connection per file: metadata handshake, acknowledgment, then the
//! body in chunks of at most `buffer_size` plaintext bytes, each encrypted
//! on its own when encryption is enabled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_PORT;
use crate::error::ShareError;
use crate::net::protocol::{guarded, Ack, Link, TransferMetadata};
use crate::policy::{PolicyProvider, TransferPolicy};
use crate::report::history::{Direction, HistoryRecord, TransferStatus};
use crate::report::{percent, Reporter, SessionId};
use crate::transfer::stats::TransferStats;

/// Send one file and report its outcome.
///
/// This is the session boundary: any error is logged, turned into a Failed
/// status and history record, and returned for the caller's bookkeeping.
/// On success returns the number of plaintext bytes sent.
pub async fn send_file(
    addr: &str,
    path: &Path,
    policy: &TransferPolicy,
    reporter: &Reporter,
    cancel: CancellationToken,
) -> Result<u64, ShareError> {
    let session = SessionId::next();
    let mut stats = TransferStats::new(1, 0);
    let mut sent: u64 = 0;
    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let result = match TransferMetadata::for_file(path, policy.encrypt).await {
        Ok(metadata) => {
            stats.bytes_total = metadata.size;
            stream_file(addr, path, &metadata, policy, session, reporter, cancel, &mut sent).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            stats.add_done(sent);
            tracing::info!(session = %session, file = %display_name, bytes = sent, peer = addr, "File sent");
            reporter.status(format!("File sent successfully: {}", stats.file_summary(&display_name)));
            reporter.history(
                session,
                HistoryRecord::new(Direction::Send, &display_name, sent, addr, TransferStatus::Completed, None),
            );
            Ok(sent)
        }
        Err(e) => {
            tracing::error!(
                session = %session,
                file = %display_name,
                peer = addr,
                kind = e.kind(),
                bytes_sent = sent,
                "Failed to send file: {}",
                e
            );
            reporter.status(format!(
                "Failed to send file {} after {} of {} bytes: {}",
                display_name, sent, stats.bytes_total, e
            ));
            reporter.history(
                session,
                HistoryRecord::new(
                    Direction::Send,
                    &display_name,
                    stats.bytes_total,
                    addr,
                    TransferStatus::Failed,
                    Some(e.to_string()),
                ),
            );
            Err(e)
        }
    }
}

/// Handshake and body for one connection. `sent` counts plaintext bytes
/// written so far, so the caller can report partial progress on failure.
#[allow(clippy::too_many_arguments)]
async fn stream_file(
    addr: &str,
    path: &Path,
    metadata: &TransferMetadata,
    policy: &TransferPolicy,
    session: SessionId,
    reporter: &Reporter,
    cancel: CancellationToken,
    sent: &mut u64,
) -> Result<(), ShareError> {
    let cipher = if metadata.encrypted {
        Some(policy.cipher().ok_or_else(|| {
            ShareError::Config("Encryption is enabled but no key is configured".into())
        })?)
    } else {
        None
    };

    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ShareError::fs(path, e))?;

    let stream = guarded(policy.io_timeout, &cancel, "connecting", TcpStream::connect(addr))
        .await?
        .map_err(|e| ShareError::Connection {
            peer: addr.to_string(),
            reason: e.to_string(),
        })?;
    let mut link = Link::new(stream, addr.to_string(), policy.io_timeout, cancel);
    tracing::debug!(session = %session, peer = addr, file = %metadata.filename, size = metadata.size, "Connected");

    // --- Handshake ---
    link.send(metadata.encode()?, "sending metadata").await?;
    let ack = link
        .recv("waiting for acknowledgment")
        .await?
        .ok_or_else(|| ShareError::HandshakeRejected("connection closed before acknowledgment".into()))?;
    if let Ack::Rejected(reason) = Ack::decode(&ack) {
        return Err(ShareError::HandshakeRejected(reason));
    }

    // --- Body ---
    // Never send more than declared, even if the file grew since the stat
    let mut reader = file.take(metadata.size);
    let mut buf = vec![0u8; policy.buffer_size];

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| ShareError::fs(path, e))?;
        if n == 0 {
            break;
        }

        let chunk = match &cipher {
            Some(cipher) => cipher.encrypt(&buf[..n])?,
            None => buf[..n].to_vec(),
        };
        link.send(chunk, "sending file data").await?;

        *sent += n as u64;
        let pct = percent(*sent, metadata.size);
        reporter.progress(session, pct, format!("Sending {}: {:.1}%", metadata.filename, pct));
    }

    if *sent < metadata.size {
        return Err(ShareError::Filesystem {
            path: path.to_path_buf(),
            reason: format!("file shrank during transfer ({} of {} bytes read)", *sent, metadata.size),
        });
    }

    link.close().await?;
    reporter.progress(session, 100.0, format!("Sending {}: 100.0%", metadata.filename));
    Ok(())
}

/// Result of a batch send.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub stats: TransferStats,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.stats.files_failed == 0
    }
}

/// Send several files concurrently, one independent session per file.
///
/// The policy snapshot is taken once. Files whose type is not allowed are
/// reported as failed right away and never open a connection.
pub async fn send_files(
    addr: &str,
    files: Vec<PathBuf>,
    policy: &dyn PolicyProvider,
    reporter: &Reporter,
    cancel: CancellationToken,
) -> BatchSummary {
    let policy = Arc::new(policy.snapshot());
    let mut stats = TransferStats::new(files.len() as u64, 0);
    let mut sessions = JoinSet::new();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        if !policy.check_file_type(&name) {
            let err = ShareError::PolicyRejected { filename: name.clone() };
            tracing::warn!(file = %name, kind = err.kind(), "Not sending: {}", err);
            reporter.status(format!("Failed to send file {}: {}", name, err));
            reporter.history(
                SessionId::next(),
                HistoryRecord::new(Direction::Send, &name, 0, addr, TransferStatus::Failed, Some(err.to_string())),
            );
            stats.add_failed();
            continue;
        }

        let addr = addr.to_string();
        let policy = Arc::clone(&policy);
        let reporter = reporter.clone();
        let cancel = cancel.child_token();
        sessions.spawn(async move { send_file(&addr, &path, &policy, &reporter, cancel).await });
    }

    while let Some(joined) = sessions.join_next().await {
        match joined {
            Ok(Ok(bytes)) => {
                stats.bytes_total += bytes;
                stats.add_done(bytes);
            }
            Ok(Err(_)) => stats.add_failed(),
            Err(e) => {
                tracing::error!("Send task aborted: {}", e);
                stats.add_failed();
            }
        }
    }

    BatchSummary { stats }
}

/// Resolve a recipient string to a connectable `host:port`.
///
/// Formats supported:
/// - `host:port` -- direct address
/// - `host` -- use DEFAULT_PORT
/// - `[v6addr]:port`, `[v6addr]` or a bare IPv6 address
pub fn resolve_recipient(target: &str) -> Result<String, ShareError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ShareError::Config("Recipient address is empty".into()));
    }

    if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| ShareError::Config(format!("Unclosed '[' in recipient: {}", target)))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port, target)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(ShareError::Config(format!("Invalid recipient: {}", target))),
        };
        return Ok(format!("[{}]:{}", host, port));
    }

    match target.matches(':').count() {
        0 => Ok(format!("{}:{}", target, DEFAULT_PORT)),
        1 => {
            let (host, port) = target.split_once(':').unwrap_or((target, ""));
            if host.is_empty() {
                return Err(ShareError::Config(format!("Missing host in recipient: {}", target)));
            }
            Ok(format!("{}:{}", host, parse_port(port, target)?))
        }
        // Bare IPv6 address without a port
        _ => Ok(format!("[{}]:{}", target, DEFAULT_PORT)),
    }
}

fn parse_port(port: &str, target: &str) -> Result<u16, ShareError> {
    port.parse::<u16>()
        .map_err(|_| ShareError::Config(format!("Invalid port in recipient: {}", target)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_host_port() {
        assert_eq!(resolve_recipient("192.168.1.50:8080").unwrap(), "192.168.1.50:8080");
    }

    #[test]
    fn resolve_host_only_uses_default_port() {
        assert_eq!(resolve_recipient("192.168.1.50").unwrap(), "192.168.1.50:5000");
        assert_eq!(resolve_recipient(" laptop.local ").unwrap(), "laptop.local:5000");
    }

    #[test]
    fn resolve_ipv6_forms() {
        assert_eq!(resolve_recipient("[::1]:9000").unwrap(), "[::1]:9000");
        assert_eq!(resolve_recipient("[::1]").unwrap(), "[::1]:5000");
        assert_eq!(resolve_recipient("fe80::1").unwrap(), "[fe80::1]:5000");
    }

    #[test]
    fn resolve_rejects_bad_input() {
        assert!(resolve_recipient("").is_err());
        assert!(resolve_recipient("host:notaport").is_err());
        assert!(resolve_recipient(":5000").is_err());
        assert!(resolve_recipient("[::1").is_err());
        assert!(resolve_recipient("[::1]x").is_err());
    }
}
