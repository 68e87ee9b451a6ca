//! Wire envelopes exchanged with the logging server.
//!
//! Requests are JSON objects framed by two CRLF pairs. Control requests carry
//! `_t` (epoch seconds) and a numeric `type`. A plaintext response bearing
//! `error_text` and `status` means the attempt failed; anything else is an
//! encrypted payload for the cipher.

use serde::{Deserialize, Serialize, Serializer};

/// Terminator appended to every request frame.
pub const FRAME_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Appends the frame terminator to a payload.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + FRAME_TERMINATOR.len());
    framed.extend_from_slice(payload);
    framed.extend_from_slice(FRAME_TERMINATOR);
    framed
}

/// Strips trailing whitespace (including the frame terminator) from a response.
pub fn unframe(response: &[u8]) -> &[u8] {
    let end = response
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    &response[..end]
}

/// Request types understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Connect = 1,
    Ack = 2,
    Touch = 3,
    TokenRequest = 4,
}

impl Serialize for RequestType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// CONNECT / ACK / TOUCH request body.
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    #[serde(rename = "_t")]
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Public key for a fresh identity; only sent on CONNECT without `client_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsa_public_key: Option<String>,
}

impl ControlRequest {
    pub fn new(request_type: RequestType, timestamp: i64) -> Self {
        Self {
            timestamp,
            request_type,
            client_id: None,
            rsa_public_key: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.rsa_public_key = Some(public_key.into());
        self
    }
}

/// Authorization exchange request, sent to the token endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest {
    #[serde(rename = "_t")]
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub logger_id: String,
    pub access_code: String,
}

impl TokenRequest {
    pub fn new(logger_id: &str, access_code: &str, timestamp: i64) -> Self {
        Self {
            timestamp,
            request_type: RequestType::TokenRequest,
            logger_id: logger_id.to_string(),
            access_code: access_code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// Seconds, 0 = never expires
    #[serde(default)]
    pub life: i64,
    #[serde(default)]
    pub status: i64,
}

/// Plaintext failure response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorEnvelope {
    pub error_text: String,
    pub status: i64,
}

impl ErrorEnvelope {
    /// Returns the envelope if the response is a plaintext error object.
    pub fn detect(response: &[u8]) -> Option<Self> {
        serde_json::from_slice(unframe(response)).ok()
    }
}

/// One log record as delivered to the logging endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "_t")]
    pub timestamp: i64,
    /// Epoch milliseconds, adjusted by the configured clock offset
    pub datetime: i64,
    pub logger: String,
    pub msg: String,
    pub app: String,
    pub level: u32,
    pub file: String,
    pub line: u32,
    pub func: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vlevel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
    #[serde(default)]
    pub thread: String,
}
