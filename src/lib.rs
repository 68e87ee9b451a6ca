//! Client-side session manager for a Residue logging server.
//!
//! Many short-lived processes on one host share a single authenticated
//! session through a durable store under `session_dir`. Each process builds a
//! [`Residue`] handle once and logs through [`Logger`]s; the handle connects,
//! renews, and fetches access tokens as needed before every record.

pub mod cipher;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod internal_log;
pub mod level;
pub mod lock;
pub mod message_format;
pub mod protocol;
pub mod session;
pub mod session_paths;
pub mod session_store;
pub mod token_cache;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use cipher::{Cipher, RipeCipher};
pub use config::ClientConfig;
pub use dispatcher::{ClientStatus, LogRequest, Logger, Residue, ResidueClient};
pub use error::{ResidueError, Result};
pub use level::Level;
pub use session::{Session, SessionFlags};
pub use transport::{Endpoint, TcpTransport, Transport};
