//! Tracing setup: stderr for the terminal, plus a daily log file.
//!
//! `RUST_LOG` overrides the `-q`/`-v` flags for stderr. The file layer
//! always records info and above as `<timestamp> - <LEVEL> - <message>`.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, NaiveDate};
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::types::Verbosity;

/// Plain one-line format for the log file.
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "{} - {} - ",
            Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// `fileshare_YYYYMMDD.log`
pub fn log_file_name(date: NaiveDate) -> String {
    format!("fileshare_{}.log", date.format("%Y%m%d"))
}

fn open_log_file(log_dir: &Path) -> std::io::Result<(PathBuf, File)> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name(Local::now().date_naive()));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

/// Install the global subscriber. Call once, before any other tracing.
///
/// A log file that cannot be opened only costs the file layer; stderr
/// logging still works.
pub fn init(verbosity: Verbosity, log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.as_tracing_filter()));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr) // Keep stdout clean for output
        .with_target(false)
        .with_filter(filter);

    let mut open_error = None;
    let file_layer = log_dir.and_then(|dir| match open_log_file(dir) {
        Ok((_, file)) => Some(
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::INFO),
        ),
        Err(e) => {
            open_error = Some(e);
            None
        }
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(e) = open_error {
        tracing::warn!("Log file disabled: {}", e);
    }
    tracing::debug!("Verbosity level: {:?}", verbosity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn file_name_uses_compact_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(log_file_name(date), "fileshare_20240307.log");
    }

    #[test]
    fn line_format_is_timestamp_level_message() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(LineFormat)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("Received file from 10.0.0.2: a.txt");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let line = output.trim_end();
        assert!(line.ends_with(" - WARN - Received file from 10.0.0.2: a.txt"), "{}", line);
        // 2024-03-07 12:34:56,789
        let timestamp = line.split(" - ").next().unwrap();
        assert_eq!(timestamp.len(), 23);
        assert_eq!(output.lines().count(), 1);
    }

    #[test]
    fn open_log_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let (path, mut file) = open_log_file(&logs).unwrap();
        writeln!(file, "x").unwrap();
        assert!(path.starts_with(&logs));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("fileshare_"));
    }
}
