use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, de};
use time::format_description::OwnedFormatItem;

use crate::notify::NotificationTemplate;
use crate::{Error, Level, Result};

/// Default flush interval in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 1000;
/// Default rotation threshold (2 MiB).
pub const DEFAULT_FILE_SIZE: u64 = 2 * 1024 * 1024;
/// Default date rendering, e.g. `2026-10-19T08:15:00`.
pub const DEFAULT_DATE_FORMAT: &str = "[year]-[month]-[day]T[hour]:[minute]:[second]";
/// Default capacity of the producer queue in front of the channel client.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Parse a size string with an optional unit (B/K/M/G, case-insensitive), defaulting to bytes.
fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let Some(last) = s.chars().last() else {
        return Err("empty size string".to_string());
    };

    let (num_str, unit) = if last.is_alphabetic() {
        (&s[..s.len() - last.len_utf8()], last.to_ascii_uppercase())
    } else {
        (s, 'B')
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier = match unit {
        'B' => 1,
        'K' => 1024,
        'M' => 1024 * 1024,
        'G' => 1024 * 1024 * 1024,
        _ => return Err(format!("invalid unit: {}, supported: B/K/M/G", unit)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size too large".to_string())
}

/// Size value that can be a number of bytes or a string with units.
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Number(u64),
    String(String),
}

impl SizeValue {
    fn to_bytes(&self) -> std::result::Result<u64, String> {
        match self {
            SizeValue::Number(n) => Ok(*n),
            SizeValue::String(s) => parse_size(s),
        }
    }
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    SizeValue::deserialize(deserializer)?
        .to_bytes()
        .map_err(de::Error::custom)
}

fn deserialize_opt_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<SizeValue>::deserialize(deserializer)?
        .map(|value| value.to_bytes())
        .transpose()
        .map_err(de::Error::custom)
}

/// When buffered records are moved to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Flush unconditionally on every tick.
    Timer(Duration),
    /// Flush as soon as the buffered byte count reaches the threshold.
    Size(u64),
}

/// Configuration for a shared logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Path to the log file.
    pub filename: PathBuf,
    /// Flush interval in milliseconds. Ignored when `size` is set.
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Flush threshold in bytes. Disables the periodic timer.
    #[serde(default, deserialize_with = "deserialize_opt_size")]
    pub size: Option<u64>,
    /// Rotate once a write would bring the file to this many bytes.
    /// Accepts a number of bytes or a string with units ("512K", "2M").
    #[serde(
        default = "default_file_size",
        deserialize_with = "deserialize_size"
    )]
    pub file_size: u64,
    /// `time` format description used to render record timestamps.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Annotate every line with the call site of the logging call.
    #[serde(default)]
    pub trace: bool,
    /// Echo every line to the console as well.
    #[serde(default)]
    pub to_console: bool,
    /// Records below this level are discarded.
    #[serde(default)]
    pub output_level: Level,
    /// Action name rendered into every line.
    #[serde(default)]
    pub action: Option<String>,
    /// Message template used when rotated files are exported.
    #[serde(default)]
    pub mail: Option<NotificationTemplate>,
    /// Directory holding the ownership channel sockets.
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,
    /// Capacity of the queue between log calls and the channel client.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl LogConfig {
    /// Create a new LogConfig for the given file with defaults
    pub fn new<P: Into<PathBuf>>(filename: P) -> Self {
        Self {
            filename: filename.into(),
            ttl: None,
            size: None,
            file_size: default_file_size(),
            date_format: default_date_format(),
            trace: false,
            to_console: false,
            output_level: Level::default(),
            action: None,
            mail: None,
            socket_dir: None,
            channel_capacity: default_channel_capacity(),
        }
    }

    /// Flush every `ttl` milliseconds
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self.size = None;
        self
    }

    /// Flush whenever `size` bytes are buffered
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self.ttl = None;
        self
    }

    /// Set rotation threshold
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.file_size = file_size;
        self
    }

    /// Set date format description
    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = date_format.into();
        self
    }

    /// Enable call-site annotation
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Enable console echo
    pub fn with_console(mut self, to_console: bool) -> Self {
        self.to_console = to_console;
        self
    }

    /// Set minimum output level
    pub fn with_output_level(mut self, level: Level) -> Self {
        self.output_level = level;
        self
    }

    /// Set action name
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Set notification template
    pub fn with_mail(mut self, mail: NotificationTemplate) -> Self {
        self.mail = Some(mail);
        self
    }

    /// Set socket directory
    pub fn with_socket_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.socket_dir = Some(dir.into());
        self
    }

    /// Set producer queue capacity
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// The active flush policy. A size threshold takes precedence over the timer.
    pub fn flush_policy(&self) -> FlushPolicy {
        match self.size {
            Some(size) => FlushPolicy::Size(size),
            None => FlushPolicy::Timer(Duration::from_millis(self.ttl.unwrap_or(DEFAULT_TTL_MS))),
        }
    }

    /// Directory where channel sockets are created.
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Parse the configured date format.
    pub fn date_format_items(&self) -> Result<OwnedFormatItem> {
        Ok(time::format_description::parse_owned::<1>(&self.date_format)?)
    }

    /// Check the configuration for values the logger cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.filename.as_os_str().is_empty() {
            return Err(Error::Config("filename is required".to_string()));
        }
        if self.ttl == Some(0) {
            return Err(Error::Config("ttl must be greater than zero".to_string()));
        }
        if self.size == Some(0) {
            return Err(Error::Config("size must be greater than zero".to_string()));
        }
        if self.file_size == 0 {
            return Err(Error::Config(
                "file_size must be greater than zero".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        self.date_format_items()?;
        Ok(())
    }
}

fn default_file_size() -> u64 {
    DEFAULT_FILE_SIZE
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_new() {
        let config = LogConfig::new("example.log");
        assert_eq!(config.filename, PathBuf::from("example.log"));
        assert_eq!(config.file_size, 2_097_152);
        assert_eq!(config.ttl, None);
        assert_eq!(config.size, None);
        assert!(!config.trace);
        assert!(!config.to_console);
        assert_eq!(config.output_level, Level::Debug);
        assert!(config.action.is_none());
        assert!(config.mail.is_none());
    }

    #[test]
    fn test_default_flush_policy_is_timer() {
        let config = LogConfig::new("example.log");
        assert_eq!(
            config.flush_policy(),
            FlushPolicy::Timer(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_size_disables_timer() {
        let config = LogConfig::new("example.log").with_ttl(200).with_size(4096);
        assert_eq!(config.ttl, None);
        assert_eq!(config.flush_policy(), FlushPolicy::Size(4096));

        let mut config = LogConfig::new("example.log");
        config.ttl = Some(200);
        config.size = Some(512);
        assert_eq!(config.flush_policy(), FlushPolicy::Size(512));
    }

    #[test]
    fn test_with_ttl_clears_size() {
        let config = LogConfig::new("example.log").with_size(4096).with_ttl(250);
        assert_eq!(
            config.flush_policy(),
            FlushPolicy::Timer(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("512"), Ok(512));
        assert_eq!(parse_size("4k"), Ok(4 * 1024));
        assert_eq!(parse_size("2M"), Ok(2 * 1024 * 1024));
        assert_eq!(parse_size("1g"), Ok(1024 * 1024 * 1024));
        assert_eq!(parse_size("10b"), Ok(10));
        assert!(parse_size("").is_err());
        assert!(parse_size("12x").is_err());
        assert!(parse_size("abcK").is_err());
    }

    #[test]
    fn test_config_deserialize_yaml() {
        let yaml = r#"
filename: logs/app.log
size: "4K"
file_size: "1M"
output_level: warn
action: worker
trace: true
"#;
        let config: LogConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.filename, PathBuf::from("logs/app.log"));
        assert_eq!(config.size, Some(4096));
        assert_eq!(config.file_size, 1024 * 1024);
        assert_eq!(config.output_level, Level::Warn);
        assert_eq!(config.action.as_deref(), Some("worker"));
        assert!(config.trace);
        assert_eq!(config.date_format, DEFAULT_DATE_FORMAT);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_config_deserialize_toml() {
        let toml = r#"
filename = "app.log"
ttl = 500
file_size = 8192

[mail]
subject = "Logs from my website"
to = ["ops@example.com"]
"#;
        let config: LogConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.ttl, Some(500));
        assert_eq!(config.file_size, 8192);
        let mail = config.mail.expect("mail template");
        assert_eq!(mail.subject.as_deref(), Some("Logs from my website"));
        assert_eq!(mail.to, vec!["ops@example.com".to_string()]);
    }

    #[test]
    fn test_validate() {
        assert!(LogConfig::new("app.log").validate().is_ok());
        assert!(LogConfig::new("").validate().is_err());
        assert!(LogConfig::new("app.log").with_size(0).validate().is_err());
        assert!(LogConfig::new("app.log").with_ttl(0).validate().is_err());
        assert!(
            LogConfig::new("app.log")
                .with_file_size(0)
                .validate()
                .is_err()
        );
        assert!(
            LogConfig::new("app.log")
                .with_date_format("[year")
                .validate()
                .is_err()
        );
    }
}
