use crate::internal_log::DEFAULT_LOG_FILE_LIMIT;
use crate::session_paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration, read from `client.conf.json` (or YAML).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Control endpoint as `host:port`. Alternative to `server_host`/`server_port`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub server_host: Option<String>,
    #[serde(default)]
    pub server_port: Option<u16>,
    /// Root of the shared durable store. Defaults to `~/.residue/session`.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    /// Previously issued identity; requires `client_private_key`.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_private_key: Option<PathBuf>,
    /// Passphrase for the client private key
    #[serde(default)]
    pub client_key_secret: Option<String>,
    /// When set, CONNECT requests are encrypted with this key
    #[serde(default)]
    pub server_public_key: Option<PathBuf>,
    /// Force a full session reset once the store is older than this (seconds, 0 = never)
    #[serde(default)]
    pub reset_connection_after: u64,
    #[serde(default)]
    pub application_id: String,
    /// Added to every record timestamp (seconds, may be negative)
    #[serde(default)]
    pub time_offset: i64,
    #[serde(default)]
    pub access_codes: Vec<AccessCode>,
    #[serde(default = "default_ripe_bin")]
    pub ripe_bin: PathBuf,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Internal log size cap in bytes
    #[serde(default = "default_internal_log_file_limit")]
    pub internal_log_file_limit: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AccessCode {
    pub logger_id: String,
    pub code: String,
}

fn default_ripe_bin() -> PathBuf {
    PathBuf::from("ripe")
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_internal_log_file_limit() -> u64 {
    DEFAULT_LOG_FILE_LIMIT
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            server_host: None,
            server_port: None,
            session_dir: None,
            client_id: None,
            client_private_key: None,
            client_key_secret: None,
            server_public_key: None,
            reset_connection_after: 0,
            application_id: String::new(),
            time_offset: 0,
            access_codes: Vec::new(),
            ripe_bin: default_ripe_bin(),
            connect_timeout_secs: default_connect_timeout_secs(),
            internal_log_file_limit: default_internal_log_file_limit(),
        }
    }
}

impl ClientConfig {
    /// Loads and validates a config file. `.yaml`/`.yml` files are parsed as
    /// YAML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&content).with_context(|| {
                format!("Failed to parse config file as YAML: {}", path.display())
            })?
        } else {
            serde_json::from_str(&content).with_context(|| {
                format!("Failed to parse config file as JSON: {}", path.display())
            })?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.control_endpoint()?;

        if self.client_id.is_some() != self.client_private_key.is_some() {
            anyhow::bail!("client_id and client_private_key must be configured together");
        }

        for entry in &self.access_codes {
            if entry.logger_id.is_empty() {
                anyhow::bail!("access_codes entry with empty logger_id");
            }
        }

        Ok(())
    }

    /// Resolves the control endpoint from `url` or `server_host`/`server_port`.
    pub fn control_endpoint(&self) -> Result<(String, u16)> {
        if let Some(url) = &self.url {
            let (host, port) = url
                .rsplit_once(':')
                .with_context(|| format!("url '{}' must be host:port", url))?;
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in url '{}'", url))?;
            if host.is_empty() {
                anyhow::bail!("url '{}' has an empty host", url);
            }
            return Ok((host.to_string(), port));
        }

        match (&self.server_host, self.server_port) {
            (Some(host), Some(port)) if !host.is_empty() => Ok((host.clone(), port)),
            _ => anyhow::bail!("Either url or server_host and server_port must be configured"),
        }
    }

    pub fn session_dir(&self) -> Result<PathBuf> {
        match &self.session_dir {
            Some(dir) => Ok(dir.clone()),
            None => session_paths::default_session_dir(),
        }
    }

    /// The access code configured for a logger, if any.
    pub fn access_code(&self, logger_id: &str) -> Option<&str> {
        self.access_codes
            .iter()
            .find(|entry| entry.logger_id == logger_id)
            .map(|entry| entry.code.as_str())
    }

    /// The staleness ceiling, `None` when disabled.
    pub fn reset_after(&self) -> Option<Duration> {
        (self.reset_connection_after > 0)
            .then_some(Duration::from_secs(self.reset_connection_after))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
