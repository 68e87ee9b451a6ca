//! Durable session persistence shared across client processes.
//!
//! ## Design Decisions
//!
//! - **Atomic replace**: records are written to a per-process temp file and
//!   renamed over the target, so a concurrent reader sees either the old or
//!   the new record, never a truncated one.
//! - **Separate meta file**: `conn.meta` holds the last write time so the
//!   staleness ceiling can be checked without parsing the session.
//! - **Lock-free reads**: a missing, empty, or undecodable record reads as
//!   "no session" instead of an error.

use crate::session::{now_epoch, Session};
use crate::session_paths::SessionPaths;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

/// Writes `content` to `path` via a temp file in the same directory + rename.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(format!(".{}.tmp", std::process::id()));
    let temp_path = path.with_file_name(temp_name);

    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to rename temp file to: {}", path.display()));
    }
    Ok(())
}

/// Reads a file, mapping "not found" and empty files to `None`.
pub(crate) fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => None,
        Ok(content) => Some(content),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete: {}", path.display())),
    }
}

/// File-backed store for the shared [`Session`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    paths: SessionPaths,
}

impl SessionStore {
    pub fn new(paths: SessionPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// Loads the current session. Absent or partial records yield `None`.
    pub fn read(&self) -> Option<Session> {
        let path = self.paths.session_path();
        let content = read_optional(&path)?;
        match serde_json::from_str(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("Ignoring undecodable session record {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Atomically replaces the session record and stamps the meta file.
    pub fn write(&self, session: &Session) -> Result<()> {
        let content = serde_json::to_string(session).context("Failed to serialize session")?;
        write_atomic(&self.paths.session_path(), content.as_bytes())?;
        write_atomic(&self.paths.meta_path(), now_epoch().to_string().as_bytes())?;
        Ok(())
    }

    /// Epoch seconds of the last [`write`](Self::write), from the meta file.
    pub fn last_write(&self) -> Option<i64> {
        read_optional(&self.paths.meta_path())?.trim().parse().ok()
    }

    /// Time elapsed since the last write; `None` if never written.
    pub fn age(&self) -> Option<Duration> {
        let last = self.last_write()?;
        let elapsed = (now_epoch() - last).max(0);
        Some(Duration::from_secs(elapsed.unsigned_abs()))
    }

    /// Wipes the session, its meta file, and every access token.
    pub fn delete_all(&self) -> Result<()> {
        remove_if_exists(&self.paths.session_path())?;
        remove_if_exists(&self.paths.meta_path())?;
        self.delete_tokens()
    }

    /// Removes every durable access token, leaving the session in place.
    pub fn delete_tokens(&self) -> Result<()> {
        let tokens_dir = self.paths.tokens_dir();
        let entries = match fs::read_dir(&tokens_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read tokens directory: {}", tokens_dir.display())
                })
            }
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_file() {
                remove_if_exists(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/session_store_tests.rs"]
mod tests;
