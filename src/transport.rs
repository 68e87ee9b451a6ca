//! Transport capability: delivers frames to the server's three endpoints.

use crate::error::{ResidueError, Result};
use crate::protocol::FRAME_TERMINATOR;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Which server endpoint a frame is addressed to.
///
/// The token and logging ports are issued by the server as part of the
/// session, so they travel with the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Control,
    Token(u16),
    Logging(u16),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Control => write!(f, "control"),
            Endpoint::Token(port) => write!(f, "token:{}", port),
            Endpoint::Logging(port) => write!(f, "logging:{}", port),
        }
    }
}

pub trait Transport: Send + Sync {
    /// Sends a framed request and returns the raw response.
    fn send(&self, endpoint: Endpoint, frame: &[u8]) -> Result<Vec<u8>>;

    /// Sends a frame without reading any response.
    fn send_and_forget(&self, endpoint: Endpoint, frame: &[u8]) -> Result<()>;
}

/// Plain TCP transport. One connection per request.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    host: String,
    control_port: u16,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, control_port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            control_port,
            timeout,
        }
    }

    fn port_for(&self, endpoint: Endpoint) -> u16 {
        match endpoint {
            Endpoint::Control => self.control_port,
            Endpoint::Token(port) | Endpoint::Logging(port) => port,
        }
    }

    fn connect(&self, endpoint: Endpoint) -> Result<TcpStream> {
        let port = self.port_for(endpoint);
        let addrs = (self.host.as_str(), port).to_socket_addrs().map_err(|e| {
            ResidueError::Transport(format!("cannot resolve {}:{}: {}", self.host, port, e))
        })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(ResidueError::Transport(format!(
            "cannot connect to {} endpoint {}:{}: {}",
            endpoint,
            self.host,
            port,
            last_error.map_or_else(|| "no addresses".to_string(), |e| e.to_string())
        )))
    }
}

impl Transport for TcpTransport {
    fn send(&self, endpoint: Endpoint, frame: &[u8]) -> Result<Vec<u8>> {
        let mut stream = self.connect(endpoint)?;
        stream.write_all(frame)?;
        stream.flush()?;

        // Read until the server closes the connection or terminates its frame
        let mut response = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response.ends_with(FRAME_TERMINATOR) {
                break;
            }
        }

        if response.is_empty() {
            return Err(ResidueError::Transport(format!(
                "empty response from {} endpoint",
                endpoint
            )));
        }
        Ok(response)
    }

    fn send_and_forget(&self, endpoint: Endpoint, frame: &[u8]) -> Result<()> {
        let mut stream = self.connect(endpoint)?;
        stream.write_all(frame)?;
        stream.flush()?;
        Ok(())
    }
}
