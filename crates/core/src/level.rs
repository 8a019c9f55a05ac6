use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlacklogError};

/// Attachment accent used for verbose and debug events.
pub const COLOR_MUTED: &str = "#777";
pub const COLOR_INFO: &str = "#5bc0de";
pub const COLOR_WARNING: &str = "#f0ad4e";
pub const COLOR_DANGER: &str = "#d9534f";

/// Deserializes through [`FromStr`], so JSON input accepts the same
/// case-insensitive names and aliases as the command line.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(try_from = "String")]
pub enum Level {
    #[default]
    Verbose,
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Self::Verbose,
        Self::Debug,
        Self::Information,
        Self::Warning,
        Self::Error,
        Self::Fatal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verbose => "Verbose",
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Verbose | Self::Debug => COLOR_MUTED,
            Self::Information => COLOR_INFO,
            Self::Warning => COLOR_WARNING,
            Self::Error | Self::Fatal => COLOR_DANGER,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = SlacklogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VERBOSE" | "TRACE" => Ok(Self::Verbose),
            "DEBUG" => Ok(Self::Debug),
            "INFORMATION" | "INFO" => Ok(Self::Information),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" | "ERR" => Ok(Self::Error),
            "FATAL" | "CRITICAL" => Ok(Self::Fatal),
            _ => Err(SlacklogError::Parse(format!("unknown level: {s}"))),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = SlacklogError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_str(&value)
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Verbose,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Information,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }
}
