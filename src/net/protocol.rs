//! Wire protocol for one-file-per-connection transfers.
//!
//! Every unit travels in a length-delimited frame (4-byte big-endian length
//! prefix), so chunk boundaries on the wire are exactly the boundaries the
//! cipher used. A session is:
//!
//! 1. Sender -> receiver: `TransferMetadata` (bincode, at most 1024 bytes)
//! 2. Receiver -> sender: ack token, `OK` or `REJECT:<reason>`
//! 3. Sender -> receiver: body chunks until `size` plaintext bytes arrived

use std::path::{Component, Path};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::error::ShareError;

/// Default plaintext bytes per body chunk.
pub const BUFFER_SIZE: usize = 8192;

/// Upper bound on the serialized metadata record.
pub const METADATA_MAX_LEN: usize = 1024;

/// Maximum frame size accepted by the codec (1 MB).
///
/// Bounds a single body chunk including encryption overhead.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// XChaCha20 nonce prefixed to every encrypted chunk.
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag appended to every encrypted chunk.
pub const TAG_LEN: usize = 16;

/// Acknowledgment token accepting the transfer.
pub const ACK_OK: &[u8] = b"OK";

/// Prefix of a rejection token; the reason follows as UTF-8.
pub const REJECT_PREFIX: &[u8] = b"REJECT:";

/// Longest filename the sender will announce.
const MAX_FILENAME_LEN: usize = 255;

/// Descriptor exchanged before any file bytes.
///
/// `size` is the plaintext size; encrypted chunks on the wire are larger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    /// Base name only, never a path
    pub filename: String,
    pub size: u64,
    pub encrypted: bool,
}

impl TransferMetadata {
    /// Build metadata for a local file from its base name and current size.
    pub async fn for_file(path: &Path, encrypted: bool) -> Result<Self, ShareError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| ShareError::fs(path, e))?;
        if !meta.is_file() {
            return Err(ShareError::Filesystem {
                path: path.to_path_buf(),
                reason: "not a regular file".into(),
            });
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ShareError::Filesystem {
                path: path.to_path_buf(),
                reason: "path has no file name".into(),
            })?;
        let metadata = Self {
            filename,
            size: meta.len(),
            encrypted,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<(), ShareError> {
        validate_filename(&self.filename)
    }

    /// Serialize with bincode; fails if the record would exceed the cap.
    pub fn encode(&self) -> Result<Vec<u8>, ShareError> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ShareError::MalformedMetadata(format!("Failed to encode: {}", e)))?;
        if bytes.len() > METADATA_MAX_LEN {
            return Err(ShareError::MalformedMetadata(format!(
                "record is {} bytes, limit is {}",
                bytes.len(),
                METADATA_MAX_LEN
            )));
        }
        Ok(bytes)
    }

    /// Deserialize and validate a metadata record received from a peer.
    pub fn decode(bytes: &[u8]) -> Result<Self, ShareError> {
        if bytes.len() > METADATA_MAX_LEN {
            return Err(ShareError::MalformedMetadata(format!(
                "record is {} bytes, limit is {}",
                bytes.len(),
                METADATA_MAX_LEN
            )));
        }
        let (metadata, read): (TransferMetadata, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ShareError::MalformedMetadata(format!("Failed to decode: {}", e)))?;
        if read != bytes.len() {
            return Err(ShareError::MalformedMetadata(format!(
                "{} trailing bytes after record",
                bytes.len() - read
            )));
        }
        metadata.validate()?;
        Ok(metadata)
    }
}

/// Reject names that are empty, too long, or could escape the download directory.
pub fn validate_filename(name: &str) -> Result<(), ShareError> {
    if name.is_empty() {
        return Err(ShareError::MalformedMetadata("empty filename".into()));
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(ShareError::MalformedMetadata(format!(
            "filename longer than {} bytes",
            MAX_FILENAME_LEN
        )));
    }
    if name.contains(&['/', '\\', '\0'][..]) {
        return Err(ShareError::MalformedMetadata(format!(
            "filename must not contain path separators: {}",
            name
        )));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(ShareError::MalformedMetadata(format!(
            "filename is not a plain file name: {}",
            name
        ))),
    }
}

/// Receiver's answer to the metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    Rejected(String),
}

impl Ack {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Ack::Accepted => ACK_OK.to_vec(),
            Ack::Rejected(reason) => {
                let mut token = REJECT_PREFIX.to_vec();
                token.extend_from_slice(reason.as_bytes());
                token
            }
        }
    }

    /// Anything other than the exact `OK` token counts as a rejection.
    pub fn decode(bytes: &[u8]) -> Self {
        if bytes == ACK_OK {
            return Ack::Accepted;
        }
        let reason = match bytes.strip_prefix(REJECT_PREFIX) {
            Some(reason) => String::from_utf8_lossy(reason).to_string(),
            None => format!(
                "unexpected acknowledgment {:?}",
                String::from_utf8_lossy(bytes)
            ),
        };
        Ack::Rejected(reason)
    }
}

/// One framed TCP connection owned by a single session.
///
/// Every send and receive is bounded by the I/O timeout and aborts as soon
/// as the session's cancellation token fires. The socket is closed when the
/// link is dropped.
pub struct Link {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: String,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Link {
    pub fn new(
        stream: TcpStream,
        peer: String,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
            peer,
            timeout,
            cancel,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one frame and flush it.
    pub async fn send(&mut self, data: impl Into<Bytes>, during: &str) -> Result<(), ShareError> {
        let data = data.into();
        let (timeout, cancel) = (self.timeout, self.cancel.clone());
        let result = guarded(timeout, &cancel, during, self.framed.send(data)).await?;
        result.map_err(|e| self.io_error(e, during))
    }

    /// Read one frame. `None` means the peer closed the connection.
    pub async fn recv(&mut self, during: &str) -> Result<Option<BytesMut>, ShareError> {
        let (timeout, cancel) = (self.timeout, self.cancel.clone());
        match guarded(timeout, &cancel, during, self.framed.next()).await? {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(self.io_error(e, during)),
            None => Ok(None),
        }
    }

    /// Flush pending frames and shut down the write half.
    pub async fn close(mut self) -> Result<(), ShareError> {
        let (timeout, cancel) = (self.timeout, self.cancel.clone());
        let result = guarded(
            timeout,
            &cancel,
            "closing connection",
            SinkExt::<Bytes>::close(&mut self.framed),
        )
        .await?;
        result.map_err(|e| self.io_error(e, "closing connection"))
    }

    fn io_error(&self, err: std::io::Error, during: &str) -> ShareError {
        if err.kind() == std::io::ErrorKind::InvalidData {
            // LengthDelimitedCodec reports oversized frames this way
            return ShareError::Protocol(format!("{} while {}", err, during));
        }
        ShareError::Connection {
            peer: self.peer.clone(),
            reason: format!("{} while {}", err, during),
        }
    }
}

/// Run `fut` under an optional timeout, giving up early on cancellation.
pub async fn guarded<F, T>(
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    during: &str,
    fut: F,
) -> Result<T, ShareError>
where
    F: std::future::Future<Output = T>,
{
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| ShareError::Timeout {
                during: during.to_string(),
                secs: limit.as_secs(),
            }),
            None => Ok(fut.await),
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(ShareError::Cancelled),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransferMetadata {
        TransferMetadata {
            filename: "report.pdf".to_string(),
            size: 1_048_576,
            encrypted: true,
        }
    }

    #[test]
    fn metadata_roundtrip() {
        let encoded = sample().encode().unwrap();
        assert!(encoded.len() < 64, "Encoded size {} should be compact", encoded.len());
        assert_eq!(TransferMetadata::decode(&encoded).unwrap(), sample());
    }

    #[test]
    fn encrypted_chunk_fits_in_frame() {
        assert!(BUFFER_SIZE + NONCE_LEN + TAG_LEN < MAX_FRAME_SIZE);
    }

    #[test]
    fn decode_garbage_is_malformed() {
        let err = TransferMetadata::decode(&[0xFF, 0xFE, 0xFD, 0xFC]).unwrap_err();
        assert!(matches!(err, ShareError::MalformedMetadata(_)));
        assert!(TransferMetadata::decode(&[]).is_err());
    }

    #[test]
    fn decode_oversized_record_is_malformed() {
        let err = TransferMetadata::decode(&vec![0u8; METADATA_MAX_LEN + 1]).unwrap_err();
        assert!(format!("{}", err).contains("limit is 1024"));
    }

    #[test]
    fn decode_rejects_traversal_in_filename() {
        let evil = TransferMetadata {
            filename: "../../etc/passwd".to_string(),
            size: 10,
            encrypted: false,
        };
        // Bypass encode-side validation to simulate a hostile peer
        let bytes = bincode::serde::encode_to_vec(&evil, bincode::config::standard()).unwrap();
        let err = TransferMetadata::decode(&bytes).unwrap_err();
        assert!(matches!(err, ShareError::MalformedMetadata(_)));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = sample().encode().unwrap();
        bytes.push(0);
        assert!(TransferMetadata::decode(&bytes).is_err());
    }

    #[test]
    fn filename_validation() {
        assert!(validate_filename("notes.txt").is_ok());
        assert!(validate_filename("archive.tar.gz").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        assert!(validate_filename("").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("dir/file.txt").is_err());
        assert!(validate_filename("dir\\file.txt").is_err());
        assert!(validate_filename("/etc/passwd").is_err());
        assert!(validate_filename(&"a".repeat(300)).is_err());
    }

    #[tokio::test]
    async fn for_file_uses_basename_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let meta = TransferMetadata::for_file(&path, false).await.unwrap();
        assert_eq!(meta.filename, "hello.txt");
        assert_eq!(meta.size, 11);
        assert!(!meta.encrypted);
    }

    #[tokio::test]
    async fn for_file_missing_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TransferMetadata::for_file(&dir.path().join("nope.bin"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::Filesystem { .. }));
    }

    #[tokio::test]
    async fn for_file_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = TransferMetadata::for_file(dir.path(), false).await.unwrap_err();
        assert!(format!("{}", err).contains("not a regular file"));
    }

    #[test]
    fn ack_tokens() {
        assert_eq!(Ack::Accepted.encode(), b"OK");
        assert_eq!(Ack::decode(b"OK"), Ack::Accepted);

        let rejected = Ack::Rejected("File type not allowed".into());
        assert_eq!(rejected.encode(), b"REJECT:File type not allowed");
        assert_eq!(Ack::decode(&rejected.encode()), rejected);
    }

    #[test]
    fn unknown_ack_is_rejection() {
        match Ack::decode(b"ok") {
            Ack::Rejected(reason) => assert!(reason.contains("unexpected acknowledgment")),
            Ack::Accepted => panic!("lowercase ok must not be accepted"),
        }
    }

    #[tokio::test]
    async fn guarded_times_out() {
        let cancel = CancellationToken::new();
        let err = guarded(
            Some(Duration::from_millis(20)),
            &cancel,
            "waiting",
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ShareError::Timeout { .. }));
    }

    #[tokio::test]
    async fn guarded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = guarded(None, &cancel, "waiting", std::future::pending::<()>())
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::Cancelled));
    }
}
