//! # Sharedlog
//!
//! A buffered, rotating log writer that many processes can share.
//!
//! ## Features
//!
//! - One writer per file: the first process to open a file owns it, the
//!   others stream their records to the owner over a local socket
//! - Records are buffered and flushed on a timer or at a size threshold,
//!   sorted by timestamp
//! - Files past their size limit are gzipped into dated archive directories
//!   or exported through a [`NotificationSink`]
//! - Integration with the `tracing` ecosystem
//!
//! ## Example
//!
//! ```rust,no_run
//! use sharedlog::{LogConfig, Logger};
//!
//! # async fn run() -> sharedlog::Result<()> {
//! let config = LogConfig::new("/var/log/app.log").with_ttl(500);
//! let logger = Logger::from_config(config).await?;
//!
//! logger.info("This is an info message");
//! logger.close().await;
//! # Ok(())
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("sharedlog needs Unix domain sockets");

pub mod accumulator;
pub mod builder;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod layer;
pub mod level;
mod logger;
pub mod notify;
mod queue;
pub mod record;
pub mod rotation;
pub mod tracing_init;
pub mod writer;

pub use builder::LoggerBuilder;
pub use config::{FlushPolicy, LogConfig};
pub use error::{Error, Result};
pub use layer::SharedLogLayer;
pub use level::Level;
pub use logger::Logger;
pub use notify::{Attachment, ChannelSink, Notification, NotificationSink, NotificationTemplate};
pub use record::{CallSite, Formatter, LogRecord};
pub use rotation::RotationStrategy;
pub use tracing_init::init_logging;

/// Start building a logger for `filename`.
pub fn builder(filename: impl Into<std::path::PathBuf>) -> LoggerBuilder {
    LoggerBuilder::new(filename)
}
