//! Error types for the residue client.
//!
//! Only [`ResidueError::Configuration`] is fatal; it aborts initialization.
//! Everything else is recoverable and is absorbed at the dispatcher boundary.

/// Errors produced while establishing a session or delivering a record.
#[derive(Debug, thiserror::Error)]
pub enum ResidueError {
    /// Session directory missing, unwritable, or config otherwise unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Server returned an error envelope, or a response failed to decode.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Token exchange rejected or no access code configured.
    #[error("authorization failed for logger '{logger_id}': {message}")]
    Authorization { logger_id: String, message: String },

    /// The transport or cipher collaborator failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A log call was made on a handle whose initialization failed.
    #[error("client is not initialized")]
    Uninitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResidueError {
    /// Error raised by the server inside a plaintext error envelope.
    pub fn server_rejected(error_text: &str, status: i64) -> Self {
        Self::Handshake(format!("{}, status: {}", error_text, status))
    }

    /// Returns true for errors that must abort initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, ResidueError>;
