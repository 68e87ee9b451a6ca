//! Cipher capability used by the handshake and the dispatcher.
//!
//! The session core never touches key material directly; it hands payloads to
//! a [`Cipher`]. [`RipeCipher`] drives the `ripe` command-line tool, which
//! produces and consumes base64 text.

use crate::error::{ResidueError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Encryption operations the session core depends on.
pub trait Cipher: Send + Sync {
    /// Encrypts a bootstrap request with the server's public key.
    fn encrypt_asymmetric(&self, public_key: &Path, plain: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts a CONNECT response with the client's private key.
    fn decrypt_asymmetric(
        &self,
        private_key: &Path,
        encrypted: &[u8],
        secret: Option<&str>,
    ) -> Result<Vec<u8>>;

    /// Encrypts with the session key; the output is tagged with `client_id`.
    fn encrypt_symmetric(&self, key: &str, client_id: &str, plain: &[u8]) -> Result<Vec<u8>>;

    fn decrypt_symmetric(&self, key: &str, encrypted: &[u8]) -> Result<Vec<u8>>;

    /// Creates a fresh RSA key pair at the given paths.
    fn generate_key_pair(
        &self,
        public_key: &Path,
        private_key: &Path,
        secret: Option<&str>,
    ) -> Result<()>;
}

/// RSA key length used for generated identities.
const GENERATED_KEY_BITS: &str = "2048";

/// Cipher backed by the `ripe` binary.
#[derive(Debug, Clone)]
pub struct RipeCipher {
    ripe_bin: PathBuf,
}

impl RipeCipher {
    pub fn new(ripe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ripe_bin: ripe_bin.into(),
        }
    }

    /// Runs ripe with `input` on stdin and returns trimmed stdout.
    fn run(&self, args: &[&str], input: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.ripe_bin)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ResidueError::Transport(format!(
                    "failed to start {}: {}",
                    self.ripe_bin.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ResidueError::Transport(format!(
                "{} exited with {}: {}",
                self.ripe_bin.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut stdout = output.stdout;
        while stdout.last().is_some_and(|b| b.is_ascii_whitespace()) {
            stdout.pop();
        }
        Ok(stdout)
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        ResidueError::Configuration(format!("key path is not valid UTF-8: {}", path.display()))
    })
}

impl Cipher for RipeCipher {
    fn encrypt_asymmetric(&self, public_key: &Path, plain: &[u8]) -> Result<Vec<u8>> {
        self.run(&["-e", "--rsa", "--in-key", path_arg(public_key)?], plain)
    }

    fn decrypt_asymmetric(
        &self,
        private_key: &Path,
        encrypted: &[u8],
        secret: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut args = vec!["-d", "--rsa", "--clean", "--in-key", path_arg(private_key)?];
        if let Some(secret) = secret {
            args.extend(["--secret", secret]);
        }
        args.push("--base64");
        self.run(&args, encrypted)
    }

    fn encrypt_symmetric(&self, key: &str, client_id: &str, plain: &[u8]) -> Result<Vec<u8>> {
        self.run(&["-e", "--key", key, "--client-id", client_id], plain)
    }

    fn decrypt_symmetric(&self, key: &str, encrypted: &[u8]) -> Result<Vec<u8>> {
        self.run(&["-d", "--key", key, "--base64"], encrypted)
    }

    fn generate_key_pair(
        &self,
        public_key: &Path,
        private_key: &Path,
        secret: Option<&str>,
    ) -> Result<()> {
        let mut args = vec![
            "-g",
            "--rsa",
            "--length",
            GENERATED_KEY_BITS,
            "--out-public",
            path_arg(public_key)?,
            "--out-private",
            path_arg(private_key)?,
        ];
        if let Some(secret) = secret {
            args.extend(["--secret", secret]);
        }
        self.run(&args, &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_transport_error() {
        let cipher = RipeCipher::new("/nonexistent/ripe-binary");
        let err = cipher.decrypt_symmetric("key", b"payload").unwrap_err();
        assert!(matches!(err, ResidueError::Transport(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_trims_trailing_newline() {
        // `cat` echoes stdin back, standing in for ripe
        let cipher = RipeCipher::new("cat");
        let out = cipher.run(&[], b"hello\n").unwrap();
        assert_eq!(out, b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_exit_is_transport_error() {
        let cipher = RipeCipher::new("false");
        let err = cipher.run(&[], b"").unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }
}
