//! TCP server for receiving files pushed by peers.
//!
//! `Listener` binds once and accepts connections until its shutdown token
//! fires. Each connection gets its own task running `handle_connection`:
//! read metadata, apply policy, acknowledge, then stream the body into a
//! temporary file that is renamed into place only after the last byte.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::ShareError;
use crate::net::protocol::{Ack, Link, TransferMetadata};
use crate::policy::{PolicyProvider, TransferPolicy};
use crate::report::history::{Direction, HistoryRecord, TransferStatus};
use crate::report::{percent, Reporter, SessionId};
use crate::security::crypto::Cipher;
use crate::transfer::conflict::{part_path, resolve_destination};

/// How long shutdown waits for in-flight sessions before cancelling them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for cancelled sessions to clean up before they are aborted.
const ABORT_GRACE: Duration = Duration::from_secs(2);

/// Bound server socket accepting one file per connection.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    drain_timeout: Duration,
}

impl Listener {
    /// Bind the server socket. Port 0 picks a free port.
    pub async fn bind(host: &str, port: u16) -> Result<Self, ShareError> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            ShareError::Connection {
                peer: format!("{}:{}", host, port),
                reason: format!("failed to bind: {}. Try a different port with --port.", e),
            }
        })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            drain_timeout: DRAIN_TIMEOUT,
        })
    }

    /// Override how long shutdown waits before cancelling in-flight sessions.
    pub fn with_drain_timeout(mut self, limit: Duration) -> Self {
        self.drain_timeout = limit;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Addresses a peer can use to reach this listener.
    pub fn reachable_addresses(&self) -> Vec<IpAddr> {
        reachable_addresses(self.local_addr)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Each connection is handled on its own task, so a stalled peer never
    /// blocks acceptance. On shutdown, in-flight sessions get the drain
    /// timeout (`DRAIN_TIMEOUT` unless overridden) to finish; stragglers
    /// are then cancelled, which removes their partial files.
    pub async fn run(
        self,
        policy: Arc<dyn PolicyProvider>,
        reporter: Reporter,
        shutdown: CancellationToken,
    ) -> Result<(), ShareError> {
        let session_cancel = CancellationToken::new();
        let mut sessions: JoinSet<()> = JoinSet::new();

        tracing::info!(addr = %self.local_addr, "Listening");
        reporter.status("Server started, waiting for incoming files...");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "Connection accepted");
                        sessions.spawn(handle_connection(
                            stream,
                            peer,
                            Arc::clone(&policy),
                            reporter.clone(),
                            session_cancel.child_token(),
                        ));
                    }
                    Err(e) => {
                        // Usually transient (e.g. out of file descriptors)
                        tracing::warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Receive task aborted: {}", e);
                    }
                }
            }
        }

        drop(self.listener);
        if !sessions.is_empty() {
            tracing::info!(in_flight = sessions.len(), "Waiting for in-flight transfers");
        }
        if drain(&mut sessions, self.drain_timeout).await.is_err() {
            tracing::warn!(in_flight = sessions.len(), "Cancelling unfinished transfers");
            session_cancel.cancel();
            if drain(&mut sessions, ABORT_GRACE).await.is_err() {
                sessions.abort_all();
                while sessions.join_next().await.is_some() {}
            }
        }
        reporter.status("Server stopped");
        Ok(())
    }
}

/// A wildcard bind expands to the host's non-loopback IPv4 interface
/// addresses; a specific bind is returned as is.
pub fn reachable_addresses(bound: SocketAddr) -> Vec<IpAddr> {
    if !bound.ip().is_unspecified() {
        return vec![bound.ip()];
    }
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::debug!("Could not list network interfaces: {}", e);
            return Vec::new();
        }
    };
    let mut ips: Vec<IpAddr> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            // Skip link-local (169.254.x.x)
            IpAddr::V4(ip) if !ip.is_link_local() => Some(IpAddr::V4(ip)),
            _ => None,
        })
        .collect();
    ips.sort();
    ips.dedup();
    ips
}

async fn drain(sessions: &mut JoinSet<()>, limit: Duration) -> Result<(), tokio::time::error::Elapsed> {
    tokio::time::timeout(limit, async {
        while sessions.join_next().await.is_some() {}
    })
    .await
}

/// Session boundary for one inbound connection.
///
/// Never returns an error: every failure becomes a log line, a Failed
/// status and a history record. The socket and file are released on all
/// paths when `link` and the part file go out of scope.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    policy: Arc<dyn PolicyProvider>,
    reporter: Reporter,
    cancel: CancellationToken,
) {
    let session = SessionId::next();
    let started = Instant::now();
    let peer_label = peer.to_string();
    // One snapshot per session
    let policy = policy.snapshot();
    let mut link = Link::new(stream, peer_label.clone(), policy.io_timeout, cancel);
    let mut announced: Option<TransferMetadata> = None;

    let result = receive_file(&mut link, &policy, session, &reporter, &mut announced).await;
    drop(link);

    let (filename, size) = announced
        .map(|m| (m.filename, m.size))
        .unwrap_or_else(|| ("<unknown>".to_string(), 0));

    match result {
        Ok(path) => {
            tracing::info!(
                session = %session,
                peer = %peer,
                file = %path.display(),
                bytes = size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "File received"
            );
            reporter.status(format!("Received file from {}: {}", peer.ip(), filename));
            reporter.history(
                session,
                HistoryRecord::new(Direction::Receive, &filename, size, &peer_label, TransferStatus::Completed, None),
            );
        }
        Err(e) => {
            tracing::error!(session = %session, peer = %peer, file = %filename, kind = e.kind(), "Error receiving file: {}", e);
            reporter.status(format!("Error receiving file from {}: {}", peer.ip(), e));
            reporter.history(
                session,
                HistoryRecord::new(
                    Direction::Receive,
                    &filename,
                    size,
                    &peer_label,
                    TransferStatus::Failed,
                    Some(e.to_string()),
                ),
            );
        }
    }
}

/// Protocol flow:
/// 1. Read metadata; malformed => close without acknowledgment
/// 2. Decide against the policy; refusal => send rejection token
/// 3. Prepare the part file, then acknowledge
/// 4. Read chunks, decrypt if declared, append until `size` bytes written
/// 5. Rename the part file onto the destination
async fn receive_file(
    link: &mut Link,
    policy: &TransferPolicy,
    session: SessionId,
    reporter: &Reporter,
    announced: &mut Option<TransferMetadata>,
) -> Result<PathBuf, ShareError> {
    let record = link
        .recv("reading metadata")
        .await?
        .ok_or_else(|| ShareError::MalformedMetadata("connection closed before metadata".into()))?;
    let metadata = TransferMetadata::decode(&record)?;
    *announced = Some(metadata.clone());

    tracing::debug!(
        session = %session,
        peer = link.peer(),
        file = %metadata.filename,
        size = metadata.size,
        encrypted = metadata.encrypted,
        "Metadata received"
    );

    let prepared = match admit(policy, &metadata) {
        Ok(cipher) => PartFile::create(&policy.download_dir, &metadata.filename, session)
            .await
            .map(|part| (cipher, part)),
        Err(e) => Err(e),
    };
    let (cipher, mut part) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            let reason = match &e {
                ShareError::HandshakeRejected(reason) => reason.clone(),
                other => other.to_string(),
            };
            if let Err(send_err) = link.send(Ack::Rejected(reason).encode(), "sending rejection").await {
                tracing::debug!(session = %session, "Could not deliver rejection: {}", send_err);
            }
            return Err(e);
        }
    };
    link.send(Ack::Accepted.encode(), "sending acknowledgment").await?;

    // Terminate on plaintext written, not ciphertext read
    let mut written: u64 = 0;
    while written < metadata.size {
        let frame = link
            .recv("receiving file data")
            .await?
            .ok_or(ShareError::Truncated {
                expected: metadata.size,
                received: written,
            })?;

        let plaintext = match &cipher {
            Some(cipher) => cipher.decrypt(&frame)?,
            None => frame.to_vec(),
        };
        if written + plaintext.len() as u64 > metadata.size {
            return Err(ShareError::Protocol(format!(
                "chunk overruns declared size of {} bytes",
                metadata.size
            )));
        }

        part.write(&plaintext).await?;
        written += plaintext.len() as u64;
        let pct = percent(written, metadata.size);
        reporter.progress(session, pct, format!("Receiving {}: {:.1}%", metadata.filename, pct));
    }

    let dest = resolve_destination(&policy.download_dir, &metadata.filename, policy.on_conflict);
    part.commit(&dest).await?;
    reporter.progress(session, 100.0, format!("Receiving {}: 100.0%", metadata.filename));
    Ok(dest)
}

/// Decide whether to accept the announced file. Runs before acknowledging.
fn admit(policy: &TransferPolicy, metadata: &TransferMetadata) -> Result<Option<Cipher>, ShareError> {
    if !policy.check_file_type(&metadata.filename) {
        return Err(ShareError::PolicyRejected {
            filename: metadata.filename.clone(),
        });
    }
    if metadata.encrypted {
        let cipher = policy.cipher().ok_or_else(|| {
            ShareError::HandshakeRejected("sender encrypts but receiver has no key configured".into())
        })?;
        return Ok(Some(cipher));
    }
    if policy.require_encryption {
        return Err(ShareError::HandshakeRejected("receiver requires encryption".into()));
    }
    Ok(None)
}

/// Temporary destination file, removed unless committed.
struct PartFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    committed: bool,
}

impl PartFile {
    async fn create(dir: &Path, filename: &str, session: SessionId) -> Result<Self, ShareError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ShareError::fs(dir, e))?;
        let path = part_path(dir, filename, session);
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ShareError::fs(&path, e))?;
        Ok(Self {
            path,
            file: Some(file),
            committed: false,
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), ShareError> {
        let file = self.file.as_mut().ok_or_else(|| ShareError::Filesystem {
            path: self.path.clone(),
            reason: "file already closed".into(),
        })?;
        file.write_all(data)
            .await
            .map_err(|e| ShareError::fs(&self.path, e))
    }

    /// Flush, close and move onto `dest`, replacing any existing file.
    async fn commit(&mut self, dest: &Path) -> Result<(), ShareError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| ShareError::fs(&self.path, e))?;
        }
        tokio::fs::rename(&self.path, dest)
            .await
            .map_err(|e| ShareError::fs(dest, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "Failed to remove partial file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ConflictStrategy;
    use crate::security::crypto::SharedKey;

    fn policy(exts: &[&str], key: Option<SharedKey>, require_encryption: bool) -> TransferPolicy {
        TransferPolicy {
            allowed_extensions: exts.iter().map(|s| s.to_string()).collect(),
            download_dir: PathBuf::from("/unused"),
            encrypt: key.is_some(),
            key,
            require_encryption,
            on_conflict: ConflictStrategy::Overwrite,
            buffer_size: 8192,
            io_timeout: None,
        }
    }

    fn meta(name: &str, encrypted: bool) -> TransferMetadata {
        TransferMetadata {
            filename: name.to_string(),
            size: 10,
            encrypted,
        }
    }

    #[test]
    fn admit_checks_file_type_first() {
        let err = admit(&policy(&[".txt"], None, false), &meta("report.pdf", false)).unwrap_err();
        assert!(matches!(err, ShareError::PolicyRejected { .. }));
        assert!(admit(&policy(&[".txt"], None, false), &meta("notes.TXT", false)).unwrap().is_none());
    }

    #[test]
    fn admit_encrypted_needs_key() {
        let err = admit(&policy(&[], None, false), &meta("a.bin", true)).unwrap_err();
        assert!(matches!(err, ShareError::HandshakeRejected(_)));
        let ok = admit(&policy(&[], Some(SharedKey::generate()), false), &meta("a.bin", true)).unwrap();
        assert!(ok.is_some());
    }

    #[test]
    fn admit_enforces_required_encryption() {
        let err = admit(&policy(&[], Some(SharedKey::generate()), true), &meta("a.bin", false)).unwrap_err();
        assert!(format!("{}", err).contains("requires encryption"));
    }

    #[test]
    fn specific_bind_is_its_own_reachable_address() {
        let bound: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(reachable_addresses(bound), vec![bound.ip()]);
    }

    #[test]
    fn wildcard_bind_lists_no_loopback_or_link_local() {
        let bound: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        for ip in reachable_addresses(bound) {
            assert!(!ip.is_loopback(), "{}", ip);
            assert!(!ip.is_unspecified(), "{}", ip);
            match ip {
                IpAddr::V4(v4) => assert!(!v4.is_link_local(), "{}", v4),
                IpAddr::V6(_) => panic!("only IPv4 addresses are listed, got {}", ip),
            }
        }
    }

    #[tokio::test]
    async fn listener_reports_its_bound_address() {
        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        assert_eq!(listener.reachable_addresses(), vec![IpAddr::from([127, 0, 0, 1])]);
    }

    #[tokio::test]
    async fn part_file_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("nested").join("downloads");

        let path = {
            let mut part = PartFile::create(&downloads, "a.txt", SessionId::next()).await.unwrap();
            part.write(b"partial").await.unwrap();
            part.path.clone()
        };
        assert!(downloads.exists(), "download dir is created with parents");
        assert!(!path.exists(), "uncommitted part file must be removed");
    }

    #[tokio::test]
    async fn part_file_commit_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");
        std::fs::write(&dest, b"old contents").unwrap();

        let mut part = PartFile::create(dir.path(), "a.txt", SessionId::next()).await.unwrap();
        part.write(b"new").await.unwrap();
        part.commit(&dest).await.unwrap();
        let part_path = part.path.clone();
        drop(part);

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        assert!(!part_path.exists());
    }
}
