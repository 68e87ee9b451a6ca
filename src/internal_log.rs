//! Internal diagnostic log for the client library.
//!
//! Failures inside the dispatcher are never surfaced to the host
//! application; they are written here instead. Every client process on the
//! host appends to the same file, so the size check and truncation run under
//! an exclusive `fs2` lock.
//!
//! ## Log Format
//!
//! ```text
//! [2026-01-15T14:30:00.123Z] [WARN] [HANDSHAKE] [PID:4242] CONNECT rejected: Invalid client, status: 1
//! ```

use chrono::Utc;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default cap before the log is truncated: 2 MiB.
pub const DEFAULT_LOG_FILE_LIMIT: u64 = 2 * 1024 * 1024;

/// Log verbosity levels, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which component produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Session,
    Handshake,
    Token,
    Dispatch,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Session => "SESSION",
            LogCategory::Handshake => "HANDSHAKE",
            LogCategory::Token => "TOKEN",
            LogCategory::Dispatch => "DISPATCH",
        }
    }
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Size-capped, shared internal log file.
#[derive(Debug, Clone)]
pub struct InternalLog {
    path: PathBuf,
    max_bytes: u64,
    level: LogLevel,
}

impl InternalLog {
    pub fn new(path: PathBuf, max_bytes: u64) -> Self {
        Self {
            path,
            max_bytes,
            level: LogLevel::Info,
        }
    }

    /// Sets the minimum level written to the file.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes an entry and mirrors it as a `tracing` event.
    ///
    /// I/O failures are swallowed: the diagnostic channel must not become a
    /// new failure source for the host process.
    pub fn log(&self, level: LogLevel, category: LogCategory, message: &str) {
        match level {
            LogLevel::Error => tracing::error!(category = category.as_str(), "{}", message),
            LogLevel::Warn => tracing::warn!(category = category.as_str(), "{}", message),
            LogLevel::Info => tracing::info!(category = category.as_str(), "{}", message),
            LogLevel::Debug => tracing::debug!(category = category.as_str(), "{}", message),
        }

        if level > self.level {
            return;
        }

        let _ = self.append(&format!(
            "[{}] [{}] [{}] [PID:{}] {}",
            format_timestamp(),
            level,
            category,
            std::process::id(),
            message
        ));
    }

    pub fn error(&self, category: LogCategory, message: &str) {
        self.log(LogLevel::Error, category, message);
    }

    pub fn warn(&self, category: LogCategory, message: &str) {
        self.log(LogLevel::Warn, category, message);
    }

    pub fn info(&self, category: LogCategory, message: &str) {
        self.log(LogLevel::Info, category, message);
    }

    pub fn debug(&self, category: LogCategory, message: &str) {
        self.log(LogLevel::Debug, category, message);
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;
        let result = self.write_locked(&mut file, line);
        let _ = FileExt::unlock(&file);
        result
    }

    /// Truncates the file if it reached the cap, then appends `line`.
    fn write_locked(&self, file: &mut File, line: &str) -> std::io::Result<()> {
        if self.max_bytes > 0 && file.metadata()?.len() >= self.max_bytes {
            file.set_len(0)?;
        }
        writeln!(file, "{}", line)?;
        file.flush()
    }
}

/// Formats the current UTC time as an ISO 8601 timestamp with milliseconds.
fn format_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
