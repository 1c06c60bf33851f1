//! Log records and the formatter that produces them.

use std::fmt::{self, Write as _};
use std::panic::Location;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use time::format_description::OwnedFormatItem;
use time::{OffsetDateTime, UtcOffset};

use crate::{Level, LogConfig, Result};

/// Terminator written after every line.
#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
/// Terminator written after every line.
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

// Looked up once: reading the local offset is unsound once other threads run.
static LOCAL_OFFSET: Lazy<UtcOffset> =
    Lazy::new(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC));

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The current time in the local offset.
pub(crate) fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(*LOCAL_OFFSET)
}

/// A single formatted log line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    timestamp: u64,
    level: Level,
    line: String,
}

impl LogRecord {
    /// Create a record from an already formatted line.
    pub fn new(timestamp: u64, level: Level, line: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            line: line.into(),
        }
    }

    /// Milliseconds since the Unix epoch, assigned when the record was formatted.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// The formatted line, without terminator.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Bytes this record occupies on disk, terminator included.
    pub fn byte_len(&self) -> u64 {
        (self.line.len() + LINE_ENDING.len()) as u64
    }

    pub(crate) fn into_parts(self) -> (u64, Level, String) {
        (self.timestamp, self.level, self.line)
    }
}

/// Source location of a logging call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    file: &'static str,
    line: u32,
    column: Option<u32>,
}

impl CallSite {
    pub fn new(file: &'static str, line: u32, column: Option<u32>) -> Self {
        Self { file, line, column }
    }

    /// The location of whoever called the enclosing `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line(), Some(location.column()))
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file, self.line, column),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Turns a level and a message into a [`LogRecord`].
///
/// Lines look like `[date][LEVEL][action][call-site] - message`, where the
/// level tag is omitted for [`Level::Log`], the action tag only appears when
/// an action is configured and the call site only in trace mode.
pub struct Formatter {
    threshold: Level,
    date_format: OwnedFormatItem,
    action: Option<String>,
    trace: bool,
    to_console: bool,
    call_site_override: Mutex<Option<String>>,
}

impl Formatter {
    pub fn new(config: &LogConfig) -> Result<Self> {
        Ok(Self {
            threshold: config.output_level,
            date_format: config.date_format_items()?,
            action: config.action.clone().filter(|action| !action.is_empty()),
            trace: config.trace,
            to_console: config.to_console,
            call_site_override: Mutex::new(None),
        })
    }

    /// Whether records at `level` are kept.
    pub fn enabled(&self, level: Level) -> bool {
        level.passes(self.threshold)
    }

    /// Use `call_site` instead of the captured location for the next record.
    pub fn override_call_site(&self, call_site: impl Into<String>) {
        *self.call_site_override.lock() = Some(call_site.into());
    }

    /// Format a record stamped with the current time.
    ///
    /// Returns `None`, without touching the clock or the call-site override,
    /// when `level` is below the threshold. Otherwise a pending override
    /// replaces `call_site` and is consumed.
    pub fn format(
        &self,
        level: Level,
        message: &dyn fmt::Display,
        call_site: Option<CallSite>,
    ) -> Option<LogRecord> {
        if !self.enabled(level) {
            return None;
        }
        let site = match self.call_site_override.lock().take() {
            Some(site) => Some(site.trim_start().to_string()),
            None => call_site.map(|site| site.to_string()),
        };
        Some(self.render(now_millis(), level, message, site))
    }

    /// Format a record with an explicit timestamp.
    ///
    /// Neither level filtering nor the call-site override apply.
    pub fn format_at(
        &self,
        timestamp: u64,
        level: Level,
        message: &dyn fmt::Display,
        call_site: Option<CallSite>,
    ) -> LogRecord {
        let site = call_site.map(|site| site.to_string());
        self.render(timestamp, level, message, site)
    }

    fn render(
        &self,
        timestamp: u64,
        level: Level,
        message: &dyn fmt::Display,
        call_site: Option<String>,
    ) -> LogRecord {
        let mut line = String::with_capacity(64);
        let _ = write!(line, "[{}]", self.render_date(timestamp));
        if let Some(tag) = level.tag() {
            let _ = write!(line, "[{}]", tag);
        }
        if let Some(action) = &self.action {
            let _ = write!(line, "[{}]", action);
        }
        if self.trace
            && let Some(site) = call_site.filter(|site| !site.is_empty())
        {
            let _ = write!(line, "[{}]", site);
        }
        let _ = write!(line, " - {}", message);

        LogRecord::new(timestamp, level, line)
    }

    /// Print the record to the console when console echo is enabled.
    pub fn echo(&self, record: &LogRecord) {
        if !self.to_console {
            return;
        }
        if record.level() >= Level::Warn {
            eprintln!("{}", record.line());
        } else {
            println!("{}", record.line());
        }
    }

    fn render_date(&self, timestamp: u64) -> String {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(timestamp) * 1_000_000)
            .ok()
            .and_then(|date| date.to_offset(*LOCAL_OFFSET).format(&self.date_format).ok())
            .unwrap_or_else(|| timestamp.to_string())
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formatter")
            .field("threshold", &self.threshold)
            .field("action", &self.action)
            .field("trace", &self.trace)
            .field("to_console", &self.to_console)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MILLIS_FORMAT: &str = "[unix_timestamp precision:millisecond]";

    fn formatter(config: LogConfig) -> Formatter {
        Formatter::new(&config.with_date_format(MILLIS_FORMAT)).unwrap()
    }

    #[test]
    fn test_error_line_shape() {
        let formatter = formatter(LogConfig::new("app.log"));
        let record = formatter.format_at(1_700_000_000_123, Level::Error, &"hello", None);
        assert_eq!(record.line(), "[1700000000123][ERROR] - hello");
        assert_eq!(record.timestamp(), 1_700_000_000_123);
        assert_eq!(record.byte_len(), (record.line().len() + LINE_ENDING.len()) as u64);
    }

    #[test]
    fn test_log_level_has_no_tag() {
        let formatter = formatter(LogConfig::new("app.log"));
        let record = formatter.format_at(5, Level::Log, &"plain", None);
        assert_eq!(record.line(), "[5] - plain");
    }

    #[test]
    fn test_action_tag() {
        let formatter = formatter(LogConfig::new("app.log").with_action("my-log"));
        let record = formatter.format_at(5, Level::Info, &format_args!("{} + {}", 1, 2), None);
        assert_eq!(record.line(), "[5][INFO][my-log] - 1 + 2");
    }

    #[test]
    fn test_below_threshold_is_dropped() {
        let formatter = formatter(LogConfig::new("app.log").with_output_level(Level::Warn));
        assert!(formatter.format(Level::Info, &"quiet", None).is_none());
        assert!(formatter.format(Level::Error, &"loud", None).is_some());
    }

    #[test]
    fn test_trace_uses_call_site() {
        let formatter = formatter(LogConfig::new("app.log").with_trace(true));
        let site = CallSite::caller();
        let record = formatter.format_at(5, Level::Warn, &"traced", Some(site));
        assert_eq!(
            record.line(),
            format!("[5][WARN][{}] - traced", site)
        );
        assert!(site.to_string().starts_with("src/record.rs:"));
    }

    #[test]
    fn test_call_site_ignored_without_trace() {
        let formatter = formatter(LogConfig::new("app.log"));
        let record = formatter.format_at(5, Level::Info, &"x", Some(CallSite::new("a.rs", 1, None)));
        assert_eq!(record.line(), "[5][INFO] - x");
    }

    #[test]
    fn test_override_applies_once() {
        let formatter = formatter(LogConfig::new("app.log").with_trace(true));
        let site = CallSite::new("src/main.rs", 10, None);
        formatter.override_call_site("   at handler (server.js:4:2)");

        let first = formatter.format(Level::Info, &"a", Some(site)).unwrap();
        assert!(first.line().ends_with("][INFO][at handler (server.js:4:2)] - a"));

        let second = formatter.format(Level::Info, &"b", Some(site)).unwrap();
        assert!(second.line().ends_with("][INFO][src/main.rs:10] - b"));
    }

    #[test]
    fn test_format_at_leaves_override_pending() {
        let formatter = formatter(LogConfig::new("app.log").with_trace(true));
        formatter.override_call_site("custom");
        let internal = formatter.format_at(1, Level::Error, &"io failed", None);
        assert_eq!(internal.line(), "[1][ERROR] - io failed");
        let next = formatter.format(Level::Info, &"user", None).unwrap();
        assert!(next.line().contains("[custom]"));
    }

    #[test]
    fn test_filtered_record_keeps_override() {
        let formatter = formatter(
            LogConfig::new("app.log")
                .with_trace(true)
                .with_output_level(Level::Info),
        );
        formatter.override_call_site("custom");
        assert!(formatter.format(Level::Debug, &"dropped", None).is_none());
        let record = formatter.format(Level::Info, &"kept", None).unwrap();
        assert!(record.line().contains("[custom]"));
    }

    #[test]
    fn test_default_date_format() {
        let formatter = Formatter::new(&LogConfig::new("app.log")).unwrap();
        let record = formatter.format_at(now_millis(), Level::Info, &"x", None);
        // [YYYY-MM-DDTHH:MM:SS]
        let date = &record.line()[1..20];
        assert_eq!(date.len(), 19);
        assert_eq!(&date[4..5], "-");
        assert_eq!(&date[10..11], "T");
        assert_eq!(&record.line()[20..], "[INFO] - x");
    }
}
