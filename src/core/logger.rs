//! Append-only event log
//!
//! One timestamped line per entry:
//! `2024-05-01 14:03:22 [Message] Test started`. Writing is best effort;
//! a failing log never interrupts a test.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Operational message
    Message,
    /// Error report
    Exception,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => write!(f, "Message"),
            Self::Exception => write!(f, "Exception"),
        }
    }
}

/// Format a single log line (without the trailing newline)
pub fn format_line(kind: LogKind, timestamp: DateTime<Local>, message: &str) -> String {
    format!("{} [{}] {}", timestamp.format("%Y-%m-%d %H:%M:%S"), kind, message)
}

/// File-backed event log
pub struct EventLog {
    path: PathBuf,
    file: Mutex<Option<BufWriter<File>>>,
}

impl EventLog {
    /// Open `path` for appending, creating parent directories as needed.
    ///
    /// Never fails: if the file cannot be opened, entries are dropped.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_file(&path)
            .map_err(|e| warn!("Event log {} unavailable: {}", path.display(), e))
            .ok();

        Self {
            path,
            file: Mutex::new(file.map(BufWriter::new)),
        }
    }

    fn open_file(path: &Path) -> std::io::Result<File> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Is the log file open
    pub fn is_logging(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Log an operational message
    pub fn log_message(&self, message: &str) {
        self.write(LogKind::Message, message);
    }

    /// Log an error together with its source chain
    pub fn log_error(&self, error: &dyn Error) {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push('\n');
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        self.write(LogKind::Exception, &message);
    }

    fn write(&self, kind: LogKind, message: &str) {
        let mut guard = self.file.lock();
        let Some(file) = guard.as_mut() else {
            return;
        };

        let line = format_line(kind, Local::now(), message);
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            warn!("Failed to write to event log: {}", e);
        }
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        if let Some(ref mut file) = *self.file.lock() {
            let _ = file.flush();
        }
    }
}
