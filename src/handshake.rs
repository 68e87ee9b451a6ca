//! CONNECT → ACK → CONNECTED, and the TOUCH renewal.
//!
//! Every transition runs under the session lock and re-reads the shared
//! store first: another process may have finished the same handshake while
//! this one was waiting.

use crate::cipher::Cipher;
use crate::config::ClientConfig;
use crate::error::{ResidueError, Result};
use crate::internal_log::{InternalLog, LogCategory};
use crate::lock::LockManager;
use crate::protocol::{frame, unframe, ControlRequest, ErrorEnvelope, LogRecord, RequestType};
use crate::session::{now_epoch, Session};
use crate::session_paths::SessionPaths;
use crate::session_store::SessionStore;
use crate::transport::{Endpoint, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Where the handshake currently stands for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    Uninitialized,
    Connecting,
    Connected,
    Failed,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeState::Uninitialized => "uninitialized",
            HandshakeState::Connecting => "connecting",
            HandshakeState::Connected => "connected",
            HandshakeState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two capabilities plus the exchange primitives built on them.
pub struct ServerLink {
    cipher: Box<dyn Cipher>,
    transport: Box<dyn Transport>,
}

impl ServerLink {
    pub fn new(cipher: Box<dyn Cipher>, transport: Box<dyn Transport>) -> Self {
        Self { cipher, transport }
    }

    /// Sends one frame and returns the unframed response, failing on an
    /// error envelope before any decryption is attempted.
    pub fn send_checked(&self, endpoint: Endpoint, payload: &[u8]) -> Result<Vec<u8>> {
        let response = self.transport.send(endpoint, &frame(payload))?;
        if let Some(envelope) = ErrorEnvelope::detect(&response) {
            return Err(ResidueError::server_rejected(
                &envelope.error_text,
                envelope.status,
            ));
        }
        Ok(unframe(&response).to_vec())
    }

    /// Encrypts `request` with the session key, sends it and decrypts the reply.
    pub fn exchange_symmetric<T: Serialize>(
        &self,
        endpoint: Endpoint,
        session: &Session,
        request: &T,
    ) -> Result<Vec<u8>> {
        let plain = serde_json::to_vec(request)?;
        let encrypted = self
            .cipher
            .encrypt_symmetric(&session.key, &session.client_id, &plain)?;
        let response = self.send_checked(endpoint, &encrypted)?;
        self.cipher.decrypt_symmetric(&session.key, &response)
    }

    /// Fire-and-forget delivery of one record to the session's logging port.
    pub fn send_log(&self, session: &Session, record: &LogRecord) -> Result<()> {
        let plain = serde_json::to_vec(record)?;
        let encrypted = self
            .cipher
            .encrypt_symmetric(&session.key, &session.client_id, &plain)?;
        self.transport
            .send_and_forget(Endpoint::Logging(session.logging_port), &frame(&encrypted))
    }
}

/// Decodes a decrypted server payload; failures are handshake errors.
pub(crate) fn decode<T: DeserializeOwned>(what: &str, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| {
        ResidueError::Handshake(format!(
            "cannot decode {} response: {} ({})",
            what,
            e,
            String::from_utf8_lossy(payload)
        ))
    })
}

/// Client key material used by CONNECT.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// Previously issued id; `None` asks the server to mint one.
    pub client_id: Option<String>,
    /// Configured private key, copied into the session directory.
    pub configured_private_key: Option<PathBuf>,
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub secret: Option<String>,
    pub server_public_key: Option<PathBuf>,
}

impl Identity {
    pub fn from_config(config: &ClientConfig, paths: &SessionPaths) -> Self {
        Self {
            client_id: config.client_id.clone(),
            configured_private_key: config.client_private_key.clone(),
            private_key: paths.private_key_path(),
            public_key: paths.public_key_path(),
            secret: config.client_key_secret.clone(),
            server_public_key: config.server_public_key.clone(),
        }
    }

    fn has_persistent_id(&self) -> bool {
        self.client_id.is_some() && self.configured_private_key.is_some()
    }
}

pub struct HandshakeStateMachine {
    link: ServerLink,
    store: SessionStore,
    lock: LockManager,
    identity: Identity,
    log: InternalLog,
    state: HandshakeState,
    session: Option<Session>,
}

impl HandshakeStateMachine {
    pub fn new(
        link: ServerLink,
        store: SessionStore,
        lock: LockManager,
        identity: Identity,
        log: InternalLog,
    ) -> Self {
        Self {
            link,
            store,
            lock,
            identity,
            log,
            state: HandshakeState::Uninitialized,
            session: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == HandshakeState::Connected
    }

    pub fn link(&self) -> &ServerLink {
        &self.link
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn lock(&self) -> &LockManager {
        &self.lock
    }

    /// Picks up whatever session the shared store currently holds.
    pub fn resume(&mut self) {
        self.session = self.store.read();
        self.state = match &self.session {
            Some(session) if session.is_connected() => HandshakeState::Connected,
            _ if self.state == HandshakeState::Failed => HandshakeState::Failed,
            _ => HandshakeState::Uninitialized,
        };
    }

    /// True when a fresh CONNECT is needed before dispatching.
    pub fn needs_connect(&self, now: i64) -> bool {
        match &self.session {
            Some(session) => !self.is_connected() || !session.is_valid(now),
            None => true,
        }
    }

    pub fn renewal_due(&self, now: i64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.renewal_due(now))
    }

    /// Runs CONNECT then ACK.
    pub fn connect(&mut self) -> Result<()> {
        let _guard = self.lock.acquire();
        self.state = HandshakeState::Connecting;
        let result = self.connect_locked();
        self.finish("CONNECT", result)
    }

    /// Renews the session in place. Falls back to CONNECT when not connected.
    pub fn touch(&mut self) -> Result<()> {
        if !self.is_connected() {
            return self.connect();
        }

        let _guard = self.lock.acquire();
        self.state = HandshakeState::Connecting;
        let result = self.touch_locked();
        self.finish("TOUCH", result)
    }

    /// Wipes the shared session and all tokens.
    pub fn reset(&mut self) -> Result<()> {
        let _guard = self.lock.acquire();
        self.store
            .delete_all()
            .map_err(|e| ResidueError::Handshake(format!("reset failed: {:#}", e)))?;
        self.session = None;
        self.state = HandshakeState::Uninitialized;
        self.log.info(LogCategory::Session, "session store reset");
        Ok(())
    }

    fn finish(&mut self, step: &str, result: Result<Session>) -> Result<()> {
        match result {
            Ok(session) if session.is_connected() => {
                self.session = Some(session);
                self.state = HandshakeState::Connected;
                Ok(())
            }
            Ok(session) => {
                let status = session.status;
                self.session = Some(session);
                self.state = HandshakeState::Failed;
                let err = ResidueError::Handshake(format!(
                    "{} finished without acknowledgement, status: {}",
                    step, status
                ));
                self.log.warn(LogCategory::Handshake, &err.to_string());
                Err(err)
            }
            Err(err) => {
                self.state = HandshakeState::Failed;
                self.log
                    .error(LogCategory::Handshake, &format!("{} failed: {}", step, err));
                Err(err)
            }
        }
    }

    fn connect_locked(&mut self) -> Result<Session> {
        let now = now_epoch();
        if let Some(existing) = self.store.read() {
            if existing.is_connected() && existing.is_valid(now) {
                self.log.debug(
                    LogCategory::Handshake,
                    &format!("adopting session {} from store", existing.client_id),
                );
                return Ok(existing);
            }
        }

        self.prepare_keys()?;

        let mut request = ControlRequest::new(RequestType::Connect, now);
        if self.identity.has_persistent_id() {
            if let Some(client_id) = &self.identity.client_id {
                request = request.with_client_id(client_id.as_str());
            }
        } else {
            request = request.with_public_key(fs::read_to_string(&self.identity.public_key)?);
        }

        let plain = serde_json::to_vec(&request)?;
        let payload = match &self.identity.server_public_key {
            Some(server_key) => self.link.cipher.encrypt_asymmetric(server_key, &plain)?,
            None => plain,
        };

        let response = self.link.send_checked(Endpoint::Control, &payload)?;
        let decrypted = self.link.cipher.decrypt_asymmetric(
            &self.identity.private_key,
            &response,
            self.identity.secret.as_deref(),
        )?;
        let session: Session = decode("CONNECT", &decrypted)?;

        // Tokens belong to the session being replaced
        self.store
            .delete_tokens()
            .map_err(|e| ResidueError::Handshake(format!("{:#}", e)))?;
        self.persist(&session)?;
        self.log.info(
            LogCategory::Handshake,
            &format!("connected as {}", session.client_id),
        );

        self.acknowledge_locked(&session)
    }

    /// ACK, with the lock already held by the caller.
    fn acknowledge_locked(&mut self, session: &Session) -> Result<Session> {
        let request =
            ControlRequest::new(RequestType::Ack, now_epoch()).with_client_id(&session.client_id);
        let response = self
            .link
            .exchange_symmetric(Endpoint::Control, session, &request)?;
        let acknowledged: Session = decode("ACK", &response)?;
        self.persist(&acknowledged)?;
        Ok(acknowledged)
    }

    fn touch_locked(&mut self) -> Result<Session> {
        let now = now_epoch();
        let current = match self.store.read() {
            Some(stored) if stored.is_connected() && stored.is_valid(now) => {
                if !stored.renewal_due(now) {
                    self.log.debug(
                        LogCategory::Handshake,
                        &format!("session {} already renewed", stored.client_id),
                    );
                    return Ok(stored);
                }
                stored
            }
            _ => self
                .session
                .clone()
                .ok_or_else(|| ResidueError::Handshake("TOUCH without a session".to_string()))?,
        };

        let request =
            ControlRequest::new(RequestType::Touch, now_epoch()).with_client_id(&current.client_id);
        let response = self
            .link
            .exchange_symmetric(Endpoint::Control, &current, &request)?;
        let renewed = current.renewed_with(&decode::<Session>("TOUCH", &response)?);
        self.persist(&renewed)?;

        // Renewal invalidates every token issued under the old lifetime
        self.store
            .delete_tokens()
            .map_err(|e| ResidueError::Handshake(format!("{:#}", e)))?;
        self.log.info(
            LogCategory::Handshake,
            &format!("session {} renewed for {}s", renewed.client_id, renewed.age),
        );
        Ok(renewed)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        self.store
            .write(session)
            .map_err(|e| ResidueError::Handshake(format!("cannot persist session: {:#}", e)))
    }

    /// Copies the configured private key into the session directory, or
    /// generates a fresh pair when none exists yet.
    fn prepare_keys(&self) -> Result<()> {
        let identity = &self.identity;
        if let Some(configured) = &identity.configured_private_key {
            if configured != &identity.private_key {
                fs::copy(configured, &identity.private_key).map_err(|e| {
                    ResidueError::Configuration(format!(
                        "cannot read client private key {}: {}",
                        configured.display(),
                        e
                    ))
                })?;
            }
            return Ok(());
        }

        if identity.private_key.exists() && identity.public_key.exists() {
            return Ok(());
        }
        self.log
            .info(LogCategory::Handshake, "generating client key pair");
        self.link.cipher.generate_key_pair(
            &identity.public_key,
            &identity.private_key,
            identity.secret.as_deref(),
        )
    }
}

#[cfg(test)]
#[path = "tests/handshake_tests.rs"]
mod tests;
