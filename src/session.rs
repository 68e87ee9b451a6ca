//! The shared connection descriptor and its validity rules.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Seconds before hard expiry at which a session is proactively touched.
pub const TOUCH_THRESHOLD_SECS: i64 = 60;

/// Current time as epoch seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Server-side capability flags attached to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionFlags(pub u32);

impl SessionFlags {
    pub const NONE: Self = Self(0);
    pub const ALLOW_UNKNOWN_LOGGERS: Self = Self(1);
    pub const REQUIRES_TOKEN: Self = Self(2);
    pub const ALLOW_DEFAULT_ACCESS_CODE: Self = Self(4);
    pub const ALLOW_PLAIN_LOG_REQUEST: Self = Self(8);
    pub const ALLOW_BULK_LOG_REQUEST: Self = Self(16);
    pub const COMPRESSION: Self = Self(256);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SessionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Durable session record shared by every client process on the host.
///
/// Field names follow the server's connection response so the decrypted
/// CONNECT/ACK/TOUCH payloads deserialize directly into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub client_id: String,
    /// Symmetric session key
    pub key: String,
    #[serde(default)]
    pub token_port: u16,
    #[serde(default)]
    pub logging_port: u16,
    #[serde(default)]
    pub flags: SessionFlags,
    #[serde(default)]
    pub status: i64,
    #[serde(
        default,
        serialize_with = "ack_to_wire",
        deserialize_with = "ack_from_wire"
    )]
    pub ack: bool,
    /// Epoch seconds
    #[serde(default)]
    pub date_created: i64,
    /// Lifetime in seconds, 0 = never expires
    #[serde(default)]
    pub age: i64,
}

impl Session {
    /// A session is valid iff `age == 0 || date_created + age >= now`.
    pub fn is_valid(&self, now: i64) -> bool {
        self.age == 0 || self.date_created.saturating_add(self.age) >= now
    }

    /// True when less than [`TOUCH_THRESHOLD_SECS`] of life remain.
    pub fn renewal_due(&self, now: i64) -> bool {
        self.age != 0
            && self.age.saturating_sub(now.saturating_sub(self.date_created))
                < TOUCH_THRESHOLD_SECS
    }

    /// `status == 0 && ack == 1`
    pub fn is_connected(&self) -> bool {
        self.status == 0 && self.ack
    }

    pub fn requires_token(&self) -> bool {
        self.flags.contains(SessionFlags::REQUIRES_TOKEN)
    }

    /// Applies a TOUCH response: identity and key material are kept, only
    /// the lifetime and status are taken from the server.
    pub fn renewed_with(&self, response: &Session) -> Session {
        Session {
            date_created: response.date_created,
            age: response.age,
            status: response.status,
            ..self.clone()
        }
    }
}

fn ack_to_wire<S: Serializer>(ack: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*ack))
}

/// The server sends `ack` as an integer; older records may carry a bool.
fn ack_from_wire<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ack {
        Flag(bool),
        Int(i64),
    }

    Ok(match Ack::deserialize(deserializer)? {
        Ack::Flag(flag) => flag,
        Ack::Int(value) => value == 1,
    })
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
