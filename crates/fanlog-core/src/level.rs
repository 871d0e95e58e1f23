//! Ordered severity levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, LogResult};

/// Log importance, ordered from `Trace` to `Fatal`.
///
/// The numeric values are stored in the record store and compared when
/// filtering, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    Trace = 10,
    Debug = 20,
    Info = 30,
    Warn = 40,
    Error = 50,
    Fatal = 60,
}

impl Severity {
    /// All levels in ascending order.
    pub const ALL: [Severity; 6] = [
        Severity::Trace,
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Fatal,
    ];

    /// Map a numeric level to its named level.
    ///
    /// An unknown number means the emitting code is wrong, so this is the
    /// one place in the pipeline that reports bad input as an error.
    pub fn from_number(number: u8) -> LogResult<Self> {
        match number {
            10 => Ok(Severity::Trace),
            20 => Ok(Severity::Debug),
            30 => Ok(Severity::Info),
            40 => Ok(Severity::Warn),
            50 => Ok(Severity::Error),
            60 => Ok(Severity::Fatal),
            other => Err(LogError::UnknownLevel(other)),
        }
    }

    pub fn as_number(self) -> u8 {
        self as u8
    }

    /// Lowercase name, also used as the file sink's level key.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "trace",
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }

    /// Every level at or above `self`.
    pub fn and_above(self) -> impl Iterator<Item = Severity> {
        Self::ALL.into_iter().filter(move |level| *level >= self)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts either a name (`"error"`, case-insensitive) or a number (`"50"`).
impl FromStr for Severity {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(number) = s.parse::<u8>() {
            return Self::from_number(number);
        }
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| LogError::UnknownLevelName(s.to_string()))
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Severity::Trace,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Info,
            tracing::Level::WARN => Severity::Warn,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}
