//! Log levels understood by the server, with their numeric wire values.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Highest verbosity level accepted for verbose records.
pub const MAX_VERBOSE_LEVEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Fatal,
    Error,
    Warning,
    Verbose,
    Info,
}

impl Level {
    /// Numeric value sent in the `level` field of a record.
    pub fn wire_value(self) -> u32 {
        match self {
            Level::Trace => 2,
            Level::Debug => 4,
            Level::Fatal => 8,
            Level::Error => 16,
            Level::Warning => 32,
            Level::Verbose => 64,
            Level::Info => 128,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Fatal => "fatal",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Verbose => "verbose",
            Level::Info => "info",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "fatal" => Ok(Level::Fatal),
            "error" => Ok(Level::Error),
            "warning" | "warn" => Ok(Level::Warning),
            "verbose" => Ok(Level::Verbose),
            "info" => Ok(Level::Info),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}
