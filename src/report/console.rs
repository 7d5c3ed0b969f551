//! Terminal shell consuming `TransferEvent`s.
//!
//! The one place that draws progress bars, prints status lines and writes
//! history. Sessions only ever reach it through the event channel.

use std::collections::HashMap;
use std::path::PathBuf;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::progress::bar::{create_session_progress, position_for};
use crate::report::history::{HistoryRecord, HistoryStore};
use crate::report::{SessionId, TransferEvent};

/// Where finished sessions are recorded.
#[derive(Debug, Clone)]
pub struct HistorySink {
    pub data_dir: PathBuf,
    pub limit: usize,
}

impl HistorySink {
    /// Append one record. The file lock is held only for this call, so
    /// `fileshare history` can read while a listener is running.
    async fn append(&self, record: HistoryRecord) {
        let sink = self.clone();
        let result = tokio::task::spawn_blocking(move || {
            HistoryStore::load(&sink.data_dir, sink.limit)?.append(record)
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to record history: {}", e),
            Err(e) => tracing::warn!("History writer panicked: {}", e),
        }
    }
}

/// Drain events until every `Reporter` has been dropped.
pub async fn run_console(
    mut events: UnboundedReceiver<TransferEvent>,
    history: Option<HistorySink>,
    quiet: bool,
) {
    let target = if quiet {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr()
    };
    let multi = MultiProgress::with_draw_target(target);
    let mut bars: HashMap<SessionId, ProgressBar> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            TransferEvent::Progress {
                session,
                percent,
                label,
            } => {
                let bar = bars
                    .entry(session)
                    .or_insert_with(|| multi.add(create_session_progress()));
                bar.set_position(position_for(percent));
                bar.set_message(label);
            }
            TransferEvent::Status { message } => {
                multi.suspend(|| tracing::info!("{}", message));
            }
            TransferEvent::History { session, record } => {
                if let Some(bar) = bars.remove(&session) {
                    bar.finish_and_clear();
                    multi.remove(&bar);
                }
                tracing::debug!(
                    session = %session,
                    direction = %record.direction,
                    file = %record.filename,
                    status = %record.status,
                    "Session finished"
                );
                if let Some(sink) = &history {
                    sink.append(record).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::history::{Direction, TransferStatus};
    use crate::report::Reporter;

    #[tokio::test]
    async fn console_records_history_and_exits_when_reporters_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (reporter, rx) = Reporter::channel();
        let sink = HistorySink {
            data_dir: dir.path().to_path_buf(),
            limit: 10,
        };
        let console = tokio::spawn(run_console(rx, Some(sink), true));

        let session = SessionId::next();
        reporter.progress(session, 40.0, "Receiving a.txt: 40.0%".into());
        reporter.status("Received file from 127.0.0.1: a.txt");
        reporter.history(
            session,
            HistoryRecord::new(Direction::Receive, "a.txt", 5, "127.0.0.1:1", TransferStatus::Completed, None),
        );
        reporter.history(
            SessionId::next(),
            HistoryRecord::new(
                Direction::Send,
                "b.pdf",
                7,
                "127.0.0.1:5000",
                TransferStatus::Failed,
                Some("File type not allowed: b.pdf".into()),
            ),
        );
        drop(reporter);
        console.await.unwrap();

        let store = HistoryStore::load(dir.path(), 10).unwrap();
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.list()[0].filename, "a.txt");
        assert_eq!(store.list()[1].status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn console_without_sink_just_drains() {
        let (reporter, rx) = Reporter::channel();
        let console = tokio::spawn(run_console(rx, None, true));
        reporter.status("hello");
        drop(reporter);
        console.await.unwrap();
    }
}
