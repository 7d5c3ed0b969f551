//! Per-session and per-batch counters behind the "sent" summary lines.

use std::time::Instant;

use bytesize::ByteSize;

#[derive(Debug, Clone)]
pub struct TransferStats {
    pub files_total: u64,
    pub files_done: u64,
    pub files_failed: u64,
    /// Declared plaintext bytes
    pub bytes_total: u64,
    /// Plaintext bytes of completed files only
    pub bytes_done: u64,
    started: Instant,
}

impl TransferStats {
    pub fn new(files_total: u64, bytes_total: u64) -> Self {
        Self {
            files_total,
            files_done: 0,
            files_failed: 0,
            bytes_total,
            bytes_done: 0,
            started: Instant::now(),
        }
    }

    pub fn add_done(&mut self, bytes: u64) {
        self.files_done += 1;
        self.bytes_done += bytes;
    }

    pub fn add_failed(&mut self) {
        self.files_failed += 1;
    }

    /// Seconds since creation and completed bytes per second.
    fn timing(&self) -> (f64, ByteSize) {
        let secs = self.started.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            (self.bytes_done as f64 / secs) as u64
        } else {
            0
        };
        (secs, ByteSize(rate))
    }

    /// e.g. `photo.jpg (2.4 MB) in 1.2s @ 2.0 MB/s`
    pub fn file_summary(&self, filename: &str) -> String {
        let (secs, rate) = self.timing();
        format!("{} ({}) in {:.1}s @ {}/s", filename, ByteSize(self.bytes_done), secs, rate)
    }

    /// e.g. `Sent 3 of 4 file(s), 1.2 MB in 0.8s, 1 failed`
    pub fn batch_summary(&self) -> String {
        let (secs, _) = self.timing();
        format!(
            "Sent {} of {} file(s), {} in {:.1}s, {} failed",
            self.files_done,
            self.files_total,
            ByteSize(self.bytes_done),
            secs,
            self.files_failed,
        )
    }
}
