use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a log record, ordered from least to most severe.
///
/// `Log` is the untagged level used by [`Logger::log`](crate::Logger::log):
/// its lines carry no `[LEVEL]` annotation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Diagnostic detail.
    #[default]
    Debug,
    /// Plain log line without a level tag.
    Log,
    /// Informational message.
    Info,
    /// Something unexpected that did not stop the program.
    Warn,
    /// A failure.
    Error,
}

impl Level {
    /// The tag rendered between brackets, or `None` for the untagged level.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            Self::Debug => Some("DEBUG"),
            Self::Log => None,
            Self::Info => Some("INFO"),
            Self::Warn => Some("WARN"),
            Self::Error => Some("ERROR"),
        }
    }

    /// Whether a record at this level passes the given threshold.
    pub fn passes(&self, threshold: Level) -> bool {
        *self >= threshold
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().unwrap_or("LOG"))
    }
}

impl FromStr for Level {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "log" => Ok(Self::Log),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::Config(format!("unknown level: {}", other))),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            _ => Level::Debug,
        }
    }
}
