//! Status reporting from sessions to the presentation shell.
//!
//! Sessions run on arbitrary tasks and never touch the shell directly. They
//! push `TransferEvent`s into an unbounded channel through a cloneable
//! `Reporter`; the shell owns the single consumer loop (see `console`).

pub mod console;
pub mod history;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use history::HistoryRecord;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Percent of plaintext bytes moved, in `0.0..=100.0`.
    Progress {
        session: SessionId,
        percent: f64,
        label: String,
    },
    /// Human-readable status line.
    Status { message: String },
    /// Terminal outcome of a session; always the session's last event.
    History {
        session: SessionId,
        record: HistoryRecord,
    },
}

/// Sending half of the event channel. Cheap to clone, one per session.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl Reporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn progress(&self, session: SessionId, percent: f64, label: String) {
        self.emit(TransferEvent::Progress {
            session,
            percent,
            label,
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(TransferEvent::Status {
            message: message.into(),
        });
    }

    pub fn history(&self, session: SessionId, record: HistoryRecord) {
        self.emit(TransferEvent::History { session, record });
    }

    fn emit(&self, event: TransferEvent) {
        // A closed shell must not fail the transfer itself
        if self.tx.send(event).is_err() {
            tracing::trace!("Reporter closed, event dropped");
        }
    }
}

/// Progress as a percentage of the declared size. An empty file is complete.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use history::{Direction, TransferStatus};

    #[test]
    fn session_ids_are_unique_and_increasing() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(b.get() > a.get());
        assert_eq!(format!("{}", a), format!("#{}", a.get()));
    }

    #[test]
    fn percent_handles_empty_and_overrun() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(300, 200), 100.0);
    }

    #[tokio::test]
    async fn events_arrive_in_emit_order() {
        let (reporter, mut rx) = Reporter::channel();
        let session = SessionId::next();

        reporter.progress(session, 50.0, "Sending a.txt: 50.0%".into());
        reporter.status("File sent successfully: a.txt");
        reporter.history(
            session,
            HistoryRecord::new(Direction::Send, "a.txt", 10, "127.0.0.1:5000", TransferStatus::Completed, None),
        );
        drop(reporter);

        assert!(matches!(rx.recv().await, Some(TransferEvent::Progress { percent, .. }) if percent == 50.0));
        assert!(matches!(rx.recv().await, Some(TransferEvent::Status { .. })));
        assert!(matches!(rx.recv().await, Some(TransferEvent::History { session: s, .. }) if s == session));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn emit_after_shell_closed_is_silent() {
        let (reporter, rx) = Reporter::channel();
        drop(rx);
        reporter.status("nobody listening");
    }
}
