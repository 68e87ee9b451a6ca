//! Turns log calls into delivered records.
//!
//! Each dispatch first brings the shared session up to date (reset past the
//! staleness ceiling, CONNECT when missing or expired, TOUCH when close to
//! expiry), then fetches a token when the session demands one, and finally
//! sends the record fire-and-forget to the logging endpoint.
//!
//! Nothing here unwinds into the host application: [`ResidueClient::log`]
//! and the [`Logger`] methods record failures in the internal log and drop
//! the record.

use crate::cipher::{Cipher, RipeCipher};
use crate::config::ClientConfig;
use crate::error::{ResidueError, Result};
use crate::handshake::{HandshakeState, HandshakeStateMachine, Identity, ServerLink};
use crate::internal_log::{InternalLog, LogCategory};
use crate::level::{Level, MAX_VERBOSE_LEVEL};
use crate::lock::LockManager;
use crate::message_format;
use crate::protocol::LogRecord;
use crate::session::{now_epoch, Session};
use crate::session_paths::SessionPaths;
use crate::session_store::SessionStore;
use crate::token_cache::{AccessToken, TokenCache};
use crate::transport::{TcpTransport, Transport};
use serde::Serialize;
use serde_json::Value;
use std::panic::Location;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// One log call, before session and token details are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRequest {
    pub logger_id: String,
    pub level: Level,
    pub vlevel: Option<u8>,
    pub message: String,
    pub file: String,
    pub line: u32,
    /// Caller or thread identifier, empty when the caller has none
    pub thread: Option<String>,
}

impl LogRequest {
    pub fn new(logger_id: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        Self {
            logger_id: logger_id.into(),
            level,
            vlevel: None,
            message: message.into(),
            file: String::new(),
            line: 0,
            thread: None,
        }
    }

    /// Verbose record; the level is clamped to 1..=9.
    pub fn verbose(logger_id: impl Into<String>, vlevel: u8, message: impl Into<String>) -> Self {
        Self {
            vlevel: Some(vlevel.clamp(1, MAX_VERBOSE_LEVEL)),
            ..Self::new(logger_id, Level::Verbose, message)
        }
    }

    pub fn with_location(mut self, location: &Location<'_>) -> Self {
        self.file = location.file().to_string();
        self.line = location.line();
        self
    }

    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }
}

/// Session and token preconditions plus record assembly.
pub struct LogDispatcher {
    handshake: HandshakeStateMachine,
    tokens: TokenCache,
    log: InternalLog,
    config: ClientConfig,
}

impl LogDispatcher {
    pub fn new(
        handshake: HandshakeStateMachine,
        tokens: TokenCache,
        log: InternalLog,
        config: &ClientConfig,
    ) -> Self {
        Self {
            handshake,
            tokens,
            log,
            config: config.clone(),
        }
    }

    pub fn handshake(&self) -> &HandshakeStateMachine {
        &self.handshake
    }

    pub fn dispatch(&mut self, request: &LogRequest) -> Result<()> {
        let session = self.ensure_session()?;

        let token = if session.requires_token() {
            Some(self.ensure_token(&session, &request.logger_id)?.token)
        } else {
            None
        };

        let record = self.build_record(request, token);
        self.handshake.link().send_log(&session, &record)
    }

    /// Brings the shared session up to date and returns a usable copy.
    pub fn ensure_session(&mut self) -> Result<Session> {
        if let Some(ceiling) = self.config.reset_after() {
            if self
                .handshake
                .store()
                .age()
                .is_some_and(|age| age >= ceiling)
            {
                self.log.info(
                    LogCategory::Session,
                    &format!("session older than {}s, resetting", ceiling.as_secs()),
                );
                self.handshake.reset()?;
                self.tokens.clear();
            }
        }

        self.handshake.resume();
        let now = now_epoch();
        if self.handshake.needs_connect(now) {
            self.handshake.connect()?;
            self.tokens.clear();
        } else if self.handshake.renewal_due(now) {
            self.handshake.touch()?;
            self.tokens.clear();
        }

        self.handshake
            .session()
            .cloned()
            .ok_or_else(|| ResidueError::Handshake("no session after connect".to_string()))
    }

    /// Returns a valid token for `logger_id`, obtaining a new one if needed.
    fn ensure_token(&mut self, session: &Session, logger_id: &str) -> Result<AccessToken> {
        let now = now_epoch();
        if let Some(token) = self
            .tokens
            .get(logger_id)
            .filter(|token| TokenCache::is_valid(Some(token), true, now))
        {
            return Ok(token);
        }

        let access_code =
            self.config
                .access_code(logger_id)
                .ok_or_else(|| ResidueError::Authorization {
                    logger_id: logger_id.to_string(),
                    message: "no access code configured".to_string(),
                })?;
        let token = self
            .tokens
            .obtain(self.handshake.link(), session, logger_id, access_code)?;
        self.log.debug(
            LogCategory::Token,
            &format!("obtained token for '{}' (life {}s)", logger_id, token.life),
        );
        Ok(token)
    }

    fn build_record(&self, request: &LogRequest, token: Option<String>) -> LogRecord {
        let now = chrono::Utc::now();
        LogRecord {
            timestamp: now.timestamp(),
            datetime: now
                .timestamp_millis()
                .saturating_add(self.config.time_offset.saturating_mul(1000)),
            logger: request.logger_id.clone(),
            msg: request.message.clone(),
            app: self.config.application_id.clone(),
            level: request.level.wire_value(),
            file: request.file.clone(),
            line: request.line,
            func: String::new(),
            vlevel: request.vlevel,
            token,
            thread: request.thread.clone().unwrap_or_default(),
        }
    }
}

/// Snapshot of the shared session as seen by this process.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    pub session_dir: PathBuf,
    pub state: String,
    pub connected: bool,
    pub session: Option<Session>,
    /// Epoch seconds of the last session write
    pub last_write: Option<i64>,
}

/// An initialized client: one per process entry point.
pub struct ResidueClient {
    dispatcher: LogDispatcher,
    log: InternalLog,
}

impl ResidueClient {
    /// Prepares the session directory and wires the capabilities together.
    ///
    /// # Errors
    ///
    /// Returns [`ResidueError::Configuration`] when the session directory
    /// cannot be created or written.
    pub fn init(
        config: &ClientConfig,
        cipher: Box<dyn Cipher>,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let session_dir = config
            .session_dir()
            .map_err(|e| ResidueError::Configuration(format!("{:#}", e)))?;
        let paths = SessionPaths::new(session_dir);
        paths
            .ensure_dirs()
            .map_err(|e| ResidueError::Configuration(format!("{:#}", e)))?;

        let log = InternalLog::new(paths.internal_log_path(), config.internal_log_file_limit);
        let lock = LockManager::new(paths.lock_path());
        let handshake = HandshakeStateMachine::new(
            ServerLink::new(cipher, transport),
            SessionStore::new(paths.clone()),
            lock.clone(),
            Identity::from_config(config, &paths),
            log.clone(),
        );
        let tokens = TokenCache::new(paths, lock);

        Ok(Self {
            dispatcher: LogDispatcher::new(handshake, tokens, log.clone(), config),
            log,
        })
    }

    /// Client backed by the `ripe` cipher and a TCP transport.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ResidueError::Configuration(format!("{:#}", e)))?;
        let (host, port) = config
            .control_endpoint()
            .map_err(|e| ResidueError::Configuration(format!("{:#}", e)))?;

        Self::init(
            config,
            Box::new(RipeCipher::new(&config.ripe_bin)),
            Box::new(TcpTransport::new(host, port, config.connect_timeout())),
        )
    }

    /// Dispatches a record, reporting why it could not be delivered.
    pub fn try_log(&mut self, request: &LogRequest) -> Result<()> {
        self.dispatcher.dispatch(request)
    }

    /// Dispatches a record; failures go to the internal log.
    pub fn log(&mut self, request: &LogRequest) {
        if let Err(e) = self.dispatcher.dispatch(request) {
            self.log.warn(
                LogCategory::Dispatch,
                &format!("dropped record for '{}': {}", request.logger_id, e),
            );
        }
    }

    /// Establishes or renews the session without sending a record.
    pub fn connect(&mut self) -> Result<Session> {
        self.dispatcher.ensure_session()
    }

    pub fn status(&mut self) -> ClientStatus {
        let handshake = &mut self.dispatcher.handshake;
        handshake.resume();
        ClientStatus {
            session_dir: handshake.store().paths().root().to_path_buf(),
            state: handshake.state().to_string(),
            connected: handshake.state() == HandshakeState::Connected,
            session: handshake.session().cloned(),
            last_write: handshake.store().last_write(),
        }
    }

    /// Wipes the shared session and every token.
    pub fn reset(&mut self) -> Result<()> {
        self.dispatcher.handshake.reset()?;
        self.dispatcher.tokens.clear();
        Ok(())
    }
}

/// Process handle. Initialization failures leave it uninitialized, in which
/// state every record is dropped.
pub struct Residue {
    client: Option<Mutex<ResidueClient>>,
}

impl Residue {
    pub fn init(config: &ClientConfig) -> Self {
        match ResidueClient::from_config(config) {
            Ok(client) => Self::with_client(client),
            Err(e) => {
                tracing::error!("residue client disabled: {}", e);
                Self::uninitialized()
            }
        }
    }

    pub fn with_client(client: ResidueClient) -> Self {
        Self {
            client: Some(Mutex::new(client)),
        }
    }

    pub fn uninitialized() -> Self {
        Self { client: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.client.is_some()
    }

    pub fn logger(&self, logger_id: impl Into<String>) -> Logger<'_> {
        Logger {
            residue: self,
            logger_id: logger_id.into(),
            thread: None,
        }
    }

    pub fn dispatch(&self, request: &LogRequest) {
        if let Some(client) = &self.client {
            client
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .log(request);
        }
    }

    pub fn try_dispatch(&self, request: &LogRequest) -> Result<()> {
        match &self.client {
            Some(client) => client
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_log(request),
            None => Err(ResidueError::Uninitialized),
        }
    }
}

/// Convenience handle bound to one logger id.
///
/// Messages are `serde_json::Value`s: a string message with arguments is
/// treated as a printf-style format, anything else is stringified.
pub struct Logger<'a> {
    residue: &'a Residue,
    logger_id: String,
    thread: Option<String>,
}

impl Logger<'_> {
    pub fn id(&self) -> &str {
        &self.logger_id
    }

    /// Tags every record from this handle with a caller identifier.
    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = Some(thread.into());
        self
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: impl Into<Value>, args: &[Value]) {
        let request = LogRequest::new(
            self.logger_id.as_str(),
            level,
            message_format::compose(&message.into(), args),
        );
        self.send(request, Location::caller());
    }

    #[track_caller]
    pub fn verbose(&self, vlevel: u8, message: impl Into<Value>, args: &[Value]) {
        let request = LogRequest::verbose(
            self.logger_id.as_str(),
            vlevel,
            message_format::compose(&message.into(), args),
        );
        self.send(request, Location::caller());
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<Value>, args: &[Value]) {
        self.log(Level::Info, message, args);
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<Value>, args: &[Value]) {
        self.log(Level::Debug, message, args);
    }

    #[track_caller]
    pub fn warning(&self, message: impl Into<Value>, args: &[Value]) {
        self.log(Level::Warning, message, args);
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<Value>, args: &[Value]) {
        self.log(Level::Error, message, args);
    }

    #[track_caller]
    pub fn fatal(&self, message: impl Into<Value>, args: &[Value]) {
        self.log(Level::Fatal, message, args);
    }

    #[track_caller]
    pub fn trace(&self, message: impl Into<Value>, args: &[Value]) {
        self.log(Level::Trace, message, args);
    }

    fn send(&self, request: LogRequest, location: &Location<'_>) {
        let mut request = request.with_location(location);
        if let Some(thread) = &self.thread {
            request = request.with_thread(thread.as_str());
        }
        self.residue.dispatch(&request);
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
