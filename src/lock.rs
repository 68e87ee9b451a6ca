//! Advisory cross-process lock over the shared session store.
//!
//! The lock is a presence marker: holding it means the marker file exists.
//! Acquisition is "create if absent" (`O_CREAT | O_EXCL`), so two processes
//! can never both create it. Owner identity is not tracked; the marker only
//! records the creating PID for diagnostics.
//!
//! A waiter polls for a bounded number of attempts and then force-clears the
//! marker, so a process that crashed while holding the lock cannot wedge
//! every other client on the host.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of polls before the marker is force-cleared.
pub const MAX_LOCK_ATTEMPTS: u32 = 5;

/// Sleep between polls.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Presence-marker lock manager.
#[derive(Debug, Clone)]
pub struct LockManager {
    marker_path: PathBuf,
    poll_interval: Duration,
    max_attempts: u32,
}

impl LockManager {
    /// Creates a lock manager with the default 5 x 1s wait bound.
    pub fn new(marker_path: PathBuf) -> Self {
        Self::with_policy(marker_path, LOCK_POLL_INTERVAL, MAX_LOCK_ATTEMPTS)
    }

    pub fn with_policy(marker_path: PathBuf, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            marker_path,
            poll_interval,
            max_attempts,
        }
    }

    /// Creates the marker if it is absent. Returns false if it already exists.
    pub fn try_acquire(&self) -> bool {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.marker_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "{} {}",
                    std::process::id(),
                    Utc::now().timestamp()
                );
                true
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
            Err(e) => {
                tracing::warn!(
                    "Failed to create lock marker {}: {}",
                    self.marker_path.display(),
                    e
                );
                false
            }
        }
    }

    /// Removes the marker. Releasing an unheld lock is a no-op.
    pub fn release(&self) {
        match std::fs::remove_file(&self.marker_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove lock marker {}: {}",
                self.marker_path.display(),
                e
            ),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.marker_path.exists()
    }

    /// Acquires the lock, waiting at most `max_attempts` poll intervals.
    ///
    /// If the marker is still present after the bound, it is force-cleared
    /// and the caller proceeds. Never blocks indefinitely and never fails.
    pub fn acquire(&self) -> LockGuard {
        for attempt in 0..self.max_attempts {
            if self.try_acquire() {
                return self.guard(false);
            }
            tracing::debug!(
                "Session lock busy (attempt {}/{})",
                attempt + 1,
                self.max_attempts
            );
            std::thread::sleep(self.poll_interval);
        }

        tracing::warn!(
            "Session lock still held after {} attempts, forcing unlock",
            self.max_attempts
        );
        self.release();
        if !self.try_acquire() {
            // Another waiter re-created the marker in the gap; proceed regardless.
            tracing::debug!("Proceeding without exclusive ownership of the session lock");
        }
        self.guard(true)
    }

    fn guard(&self, forced: bool) -> LockGuard {
        LockGuard {
            manager: self.clone(),
            forced,
        }
    }
}

/// Releases the lock when dropped, covering every early-return path.
#[derive(Debug)]
pub struct LockGuard {
    manager: LockManager,
    forced: bool,
}

impl LockGuard {
    /// True if the lock was obtained by force-clearing a stale marker.
    pub fn was_forced(&self) -> bool {
        self.forced
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release();
    }
}

#[cfg(test)]
#[path = "tests/lock_tests.rs"]
mod tests;
