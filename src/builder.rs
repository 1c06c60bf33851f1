//! Builder pattern for opening a logger.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run() -> sharedlog::Result<()> {
//! let logger = sharedlog::builder("/var/log/app.log")
//!     .with_size(64 * 1024)
//!     .with_file_size(10 * 1024 * 1024)
//!     .with_action("worker")
//!     .build()
//!     .await?;
//!
//! logger.info("started");
//! logger.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use crate::notify::{NotificationSink, NotificationTemplate};
use crate::{Level, LogConfig, Logger, Result};

/// A builder for configuring and opening a [`Logger`].
#[derive(Clone)]
pub struct LoggerBuilder {
    config: LogConfig,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl LoggerBuilder {
    /// Create a builder for `filename` with default settings.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self::from_config(LogConfig::new(filename))
    }

    /// Create a builder from an existing configuration.
    pub fn from_config(config: LogConfig) -> Self {
        Self { config, sink: None }
    }

    /// Flush every `ttl` milliseconds.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.config = self.config.with_ttl(ttl);
        self
    }

    /// Flush whenever this many bytes are buffered.
    pub fn with_size(mut self, size: u64) -> Self {
        self.config = self.config.with_size(size);
        self
    }

    /// Rotate once the file would reach this many bytes.
    pub fn with_file_size(mut self, file_size: u64) -> Self {
        self.config = self.config.with_file_size(file_size);
        self
    }

    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.config = self.config.with_date_format(date_format);
        self
    }

    /// Include the call site in every line.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.config = self.config.with_trace(trace);
        self
    }

    /// Echo every record to stdout or stderr.
    pub fn with_console(mut self, to_console: bool) -> Self {
        self.config = self.config.with_console(to_console);
        self
    }

    pub fn with_output_level(mut self, level: Level) -> Self {
        self.config = self.config.with_output_level(level);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.config = self.config.with_action(action);
        self
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config = self.config.with_socket_dir(dir);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.with_channel_capacity(capacity);
        self
    }

    /// Export rotated files through `sink` instead of archiving them.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fields used for exported messages.
    pub fn with_mail(mut self, template: NotificationTemplate) -> Self {
        self.config = self.config.with_mail(template);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Open the logger.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the configuration is invalid
    /// - the channel socket can be neither bound nor connected to
    pub async fn build(self) -> Result<Logger> {
        Logger::open(self.config, self.sink).await
    }
}

impl std::fmt::Debug for LoggerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerBuilder")
            .field("config", &self.config)
            .field("export", &self.sink.is_some())
            .finish()
    }
}
