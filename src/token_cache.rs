//! Per-logger access tokens.
//!
//! One durable file per logger id under `tokens/`, mirrored in memory for the
//! lifetime of the handle. The durable file is authoritative: every lookup
//! re-reads it, so tokens replaced or deleted by another process are seen on
//! the next call.

use crate::error::{ResidueError, Result};
use crate::handshake::{decode, ServerLink};
use crate::lock::LockManager;
use crate::protocol::{TokenRequest, TokenResponse};
use crate::session::{now_epoch, Session};
use crate::session_paths::SessionPaths;
use crate::session_store::{read_optional, write_atomic};
use crate::transport::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub logger_id: String,
    pub token: String,
    /// Seconds, 0 = never expires
    pub life: i64,
    /// Epoch seconds, stamped locally when the token was obtained
    pub date_created: i64,
}

impl AccessToken {
    /// Valid iff `life == 0 || now - date_created < life`.
    pub fn is_valid(&self, now: i64) -> bool {
        self.life == 0 || now.saturating_sub(self.date_created) < self.life
    }
}

pub struct TokenCache {
    paths: SessionPaths,
    lock: LockManager,
    mirror: HashMap<String, AccessToken>,
}

impl TokenCache {
    pub fn new(paths: SessionPaths, lock: LockManager) -> Self {
        Self {
            paths,
            lock,
            mirror: HashMap::new(),
        }
    }

    /// Looks up the token for `logger_id`, reconciling the mirror with disk.
    pub fn get(&mut self, logger_id: &str) -> Option<AccessToken> {
        let durable = read_optional(&self.paths.token_path(logger_id))
            .and_then(|content| serde_json::from_str::<AccessToken>(&content).ok());
        match durable {
            Some(token) => {
                if self.mirror.get(logger_id) != Some(&token) {
                    self.mirror.insert(logger_id.to_string(), token.clone());
                }
                Some(token)
            }
            None => {
                self.mirror.remove(logger_id);
                None
            }
        }
    }

    /// Sessions without `REQUIRES_TOKEN` accept any token, including none.
    pub fn is_valid(token: Option<&AccessToken>, requires_token: bool, now: i64) -> bool {
        if !requires_token {
            return true;
        }
        token.is_some_and(|token| token.is_valid(now))
    }

    /// Authorization exchange on the session's token endpoint.
    ///
    /// Runs under the session lock. A rejection is returned as
    /// [`ResidueError::Authorization`] and nothing is persisted.
    pub fn obtain(
        &mut self,
        link: &ServerLink,
        session: &Session,
        logger_id: &str,
        access_code: &str,
    ) -> Result<AccessToken> {
        let _guard = self.lock.acquire();
        let unauthorized = |message: String| ResidueError::Authorization {
            logger_id: logger_id.to_string(),
            message,
        };

        let request = TokenRequest::new(logger_id, access_code, now_epoch());
        let response: TokenResponse = link
            .exchange_symmetric(Endpoint::Token(session.token_port), session, &request)
            .and_then(|payload| decode("TOKEN", &payload))
            .map_err(|e| unauthorized(e.to_string()))?;
        if response.status != 0 {
            return Err(unauthorized(format!(
                "token request refused, status: {}",
                response.status
            )));
        }

        let token = AccessToken {
            logger_id: logger_id.to_string(),
            token: response.token,
            life: response.life,
            date_created: now_epoch(),
        };
        let content = serde_json::to_string(&token)?;
        write_atomic(&self.paths.token_path(logger_id), content.as_bytes())
            .map_err(|e| unauthorized(format!("cannot persist token: {:#}", e)))?;

        self.mirror.insert(logger_id.to_string(), token.clone());
        Ok(token)
    }

    /// Drops the in-memory mirror; durable tokens are untouched.
    pub fn clear(&mut self) {
        self.mirror.clear();
    }
}

#[cfg(test)]
#[path = "tests/token_cache_tests.rs"]
mod tests;
