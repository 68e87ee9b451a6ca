//! Durable layout of the shared session directory.
//!
//! Every client process on a host that points at the same `session_dir`
//! shares these files:
//! - `conn` - Session record (JSON, replaced atomically)
//! - `conn.meta` - Last write time of `conn` (epoch seconds)
//! - `conn.lock` - Lock marker, present while a process holds the session lock
//! - `tokens/<logger-hash>.json` - One access token per logger id
//! - `rsa.priv.pem` / `rsa.pub.pem` - Client key pair used during CONNECT
//! - `internal.log` - Internal diagnostics

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the default residue directory under the home directory.
const RESIDUE_DIR: &str = ".residue";

/// Returns the default session directory: `~/.residue/session/`
pub fn default_session_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory for session storage")?;
    Ok(home.join(RESIDUE_DIR).join("session"))
}

/// Paths of every durable file under one session directory.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the session directory and the tokens subdirectory.
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be created, or if the
    /// session directory exists but is read-only.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("[{}] is not writable", self.root.display()))?;
        let tokens = self.tokens_dir();
        fs::create_dir_all(&tokens)
            .with_context(|| format!("Failed to create tokens directory: {}", tokens.display()))?;

        let metadata = fs::metadata(&self.root)
            .with_context(|| format!("Failed to stat session directory: {}", self.root.display()))?;
        if metadata.permissions().readonly() {
            anyhow::bail!("[{}] is not writable", self.root.display());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_path(&self) -> PathBuf {
        self.root.join("conn")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.root.join("conn.meta")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("conn.lock")
    }

    pub fn tokens_dir(&self) -> PathBuf {
        self.root.join("tokens")
    }

    /// Token file for a logger: `tokens/<sha256(logger_id)[..12]>.json`
    ///
    /// Logger ids are hashed so arbitrary ids map to safe file names.
    pub fn token_path(&self, logger_id: &str) -> PathBuf {
        self.tokens_dir()
            .join(format!("{}.json", logger_id_hash(logger_id)))
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.root.join("rsa.priv.pem")
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.root.join("rsa.pub.pem")
    }

    pub fn internal_log_path(&self) -> PathBuf {
        self.root.join("internal.log")
    }
}

/// SHA256 of the logger id truncated to 12 hex characters.
pub fn logger_id_hash(logger_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(logger_id.as_bytes());
    let result = hasher.finalize();
    hex_encode(&result[..6])
}

/// Encodes bytes as lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
