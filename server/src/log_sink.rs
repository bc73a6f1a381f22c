//! Durable chat log.
//!
//! The engine hands every accepted message (and connect/disconnect audit lines)
//! to a [`LogSink`], which only enqueues. A background task appends the lines
//! to a file. Write failures are reported through `tracing` and never reach
//! the chat path.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// One line of the chat log, stamped when it was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
        }
    }

    /// `<ISO-8601 timestamp> <text>`, e.g. `2025-01-01T12:00:00.000Z hello`.
    pub fn to_line(&self) -> String {
        format!(
            "{} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.text
        )
    }
}

/// Cheap, cloneable handle for submitting log lines.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: Option<mpsc::UnboundedSender<LogRecord>>,
}

impl LogSink {
    /// A sink backed by an in-process channel. Whoever holds the receiver
    /// decides where the lines go.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue `text` for the log. Never blocks and never fails the caller.
    pub fn dispatch(&self, text: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(LogRecord::new(text)).is_err() {
            warn!("chat log writer is gone, dropping log line");
        }
    }
}

/// Start a task that appends every dispatched record to `path`.
///
/// The file is opened lazily and reopened after a failed write, so a missing
/// directory or a full disk costs log lines, not the server. The task ends
/// once every [`LogSink`] clone has been dropped and the queue is drained.
pub fn spawn_file_writer(path: impl Into<PathBuf>) -> (LogSink, JoinHandle<()>) {
    let path = path.into();
    let (sink, rx) = LogSink::channel();
    let handle = tokio::spawn(write_records(path, rx));
    (sink, handle)
}

async fn write_records(path: PathBuf, mut rx: mpsc::UnboundedReceiver<LogRecord>) {
    info!(path = %path.display(), "chat log writer started");
    let mut file: Option<File> = None;

    while let Some(record) = rx.recv().await {
        let mut line = record.to_line();
        line.push('\n');

        if file.is_none() {
            match open_append(&path).await {
                Ok(f) => file = Some(f),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to open chat log");
                    continue;
                }
            }
        }

        if let Some(f) = file.as_mut() {
            let result = match f.write_all(line.as_bytes()).await {
                Ok(()) => f.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                error!(path = %path.display(), error = %e, "failed to write chat log");
                file = None;
            }
        }
    }

    info!(path = %path.display(), "chat log writer stopped");
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}
